//! Client identity and ownership state.

use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Prefix marking names that were generated rather than chosen.
pub const GUEST_PREFIX: &str = ":";

/// Stable identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The name this connection is shown under until it presents a session,
    /// e.g. `:guest-3fa9c`. Changes with every connection.
    pub fn guest_name(&self) -> String {
        hashed_guest_name(self.0.as_bytes())
    }
}

/// Guest name for a client-held session token. Stable for as long as the
/// client keeps the token, so it can be given a rank in configuration.
pub fn session_guest_name(session: &str) -> String {
    hashed_guest_name(session.as_bytes())
}

fn hashed_guest_name(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().take(3).map(|b| format!("{:02x}", b)).collect();
    format!("{}guest-{}", GUEST_PREFIX, &hex[..5])
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who holds the keyboard, relative to the client being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OwnerState {
    Nobody = 0,
    You = 1,
    SomeoneElse = 2,
}

impl OwnerState {
    /// Express `arbiter` from the point of view of `viewer`.
    pub fn relative_to(arbiter: Option<ClientId>, viewer: ClientId) -> Self {
        match arbiter {
            None => OwnerState::Nobody,
            Some(owner) if owner == viewer => OwnerState::You,
            Some(_) => OwnerState::SomeoneElse,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(OwnerState::Nobody),
            1 => Some(OwnerState::You),
            2 => Some(OwnerState::SomeoneElse),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}
