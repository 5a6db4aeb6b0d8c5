//! Request and response messages exchanged with clients.
//!
//! Every message body is a JSON array whose first element is a one-character
//! tag. See `codec` for the exact shapes.

use crate::{ClientId, Cursor, Line, OwnerState};
use serde::{Deserialize, Serialize};

/// One line's content at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub seq: u64,
    pub line_number: u32,
    pub line: Line,
}

/// Terminal dimensions reported by the settings message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSettings {
    pub rows: u16,
    pub cols: u16,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `?`: all changes since the given sequence number.
    Changes { since: u64 },
    /// `%`: the whole screen.
    Screen,
    /// `s`: terminal settings.
    Settings,
    /// `h`: handshake. `session` is an opaque token the client keeps across
    /// page loads; when given, the client's name is derived from it.
    Hello { session: Option<String> },
    /// `k`: raw bytes for the terminal; only honoured for the arbiter.
    Keypress { key: Vec<u8> },
    /// `l`: leave; the connection is closed after the reply.
    Leave,
    /// `:`: chat line or slash command.
    Chat { text: String },
    /// `~`: who currently holds the keyboard.
    Owner,
    /// A well-formed request with a tag this server does not know.
    Unrecognized { tag: String },
}

impl Request {
    pub const CHANGES: &'static str = "?";
    pub const SCREEN: &'static str = "%";
    pub const SETTINGS: &'static str = "s";
    pub const HELLO: &'static str = "h";
    pub const KEYPRESS: &'static str = "k";
    pub const LEAVE: &'static str = "l";
    pub const CHAT: &'static str = ":";
    pub const OWNER: &'static str = "~";

    pub fn tag(&self) -> &str {
        match self {
            Request::Changes { .. } => Self::CHANGES,
            Request::Screen => Self::SCREEN,
            Request::Settings => Self::SETTINGS,
            Request::Hello { .. } => Self::HELLO,
            Request::Keypress { .. } => Self::KEYPRESS,
            Request::Leave => Self::LEAVE,
            Request::Chat { .. } => Self::CHAT,
            Request::Owner => Self::OWNER,
            Request::Unrecognized { tag } => tag,
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `h`
    Hello,
    /// `?`: changes ordered by ascending line number.
    Changes(Vec<ChangeRecord>),
    /// `%`: every row top to bottom plus the sequence number to ask from next.
    Screen { lines: Vec<Line>, next_seq: u64 },
    /// `s`
    Settings(TerminalSettings),
    /// `:`
    Chat { sender: String, text: String },
    /// `~`
    Owner(OwnerState),
    /// `e`
    Error(String),
    /// `u`
    Status(String),
    /// `o`
    Ok,
    /// `_`: unsolicited cursor position.
    Cursor(Cursor),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn status(message: impl Into<String>) -> Self {
        Response::Status(message.into())
    }

    pub fn owner_for(arbiter: Option<ClientId>, viewer: ClientId) -> Self {
        Response::Owner(OwnerState::relative_to(arbiter, viewer))
    }
}

/// An incoming request with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: Request,
}

/// An outgoing response. Broadcasts carry no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub id: Option<u64>,
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn reply(id: u64, response: Response) -> Self {
        Self {
            id: Some(id),
            response,
        }
    }

    pub fn broadcast(response: Response) -> Self {
        Self { id: None, response }
    }
}
