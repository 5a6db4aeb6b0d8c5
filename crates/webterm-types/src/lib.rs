//! Shared types and wire codec for the webterm shared terminal.

mod cell;
mod client;
mod codec;
mod error;
mod protocol;

pub use cell::*;
pub use client::*;
pub use codec::*;
pub use error::ProtocolError;
pub use protocol::*;
