//! Shared application state.

use crate::config::Config;
use webterm_core::{SessionCoordinator, TerminalSession};

/// The coordinator type the server runs: one real pty-backed terminal.
pub type Coordinator = SessionCoordinator<TerminalSession>;

pub struct AppState {
    pub coordinator: Coordinator,
    pub config: Config,
}

impl AppState {
    /// Builds the coordinator; the terminal itself is launched on first use.
    pub fn new(config: Config) -> Self {
        let terminal_options = config.terminal_options();
        let coordinator = SessionCoordinator::new(
            config.coordinator_options(),
            config.ranks(),
            move || TerminalSession::new(terminal_options.clone()),
        );
        Self {
            coordinator,
            config,
        }
    }
}
