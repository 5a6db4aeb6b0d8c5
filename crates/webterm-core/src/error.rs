//! Error types for the webterm core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebtermError {
    #[error("Terminal session already running")]
    AlreadyRunning,

    #[error("Terminal session closed or never opened")]
    NotRunning,

    #[error("unrecognized request: {0}")]
    UnrecognizedRequest(String),

    #[error("You are not the current arbiter.")]
    NotArbiter,

    #[error("Process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] webterm_types::ProtocolError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
