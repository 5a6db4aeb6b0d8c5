//! Shared terminal engine: pty session, screen emulation, change log and the
//! coordinator that multiplexes one terminal across many clients.

mod change_log;
mod chat;
mod coordinator;
mod emulator;
mod error;
mod rank;
mod subscriber;
mod terminal;

pub use change_log::{latest_per_line, ChangeLog, DEFAULT_MAX_CHANGES};
pub use chat::{Greeting, Room, ASK_RANK, FREE_RANK, GRAB_RANK};
pub use coordinator::{CoordinatorOptions, SessionCoordinator, DEFAULT_POLL_INTERVAL};
pub use emulator::Emulator;
pub use error::WebtermError;
pub use rank::{RankLookup, StaticRanks};
pub use subscriber::{Subscriber, Subscribers};
pub use terminal::{ScreenObserver, Terminal, TerminalOptions, TerminalSession, RELAUNCH_BACKOFF};

/// Result type for webterm operations.
pub type Result<T> = std::result::Result<T, WebtermError>;
