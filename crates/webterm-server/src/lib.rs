//! Webterm server library: HTTP/WebSocket transport, configuration and
//! logging around the shared terminal. Split from main.rs for integration tests.

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;
pub mod websocket;
