//! Wire codec: JSON envelopes and the compact line encoding.
//!
//! A line is a list whose items are either a bare string (a character in the
//! default white-on-black scheme), a `[string, color_spec]` pair, or an integer
//! repetition count meaning "repeat the previous character this many more
//! times". Examples:
//!
//! - `["a"]` is one `a`
//! - `["a", 1]` is two `a`s
//! - `[["b", 40], 4]` is five `b`s in color spec 40

use crate::{
    ChangeRecord, Cell, ColorSpec, Cursor, Line, OwnerState, ProtocolError, Request,
    RequestEnvelope, Response, ResponseEnvelope, TerminalSettings,
};
use serde_json::{json, Map, Value};

/// Upper bound on a single repetition count accepted while decoding.
pub const MAX_REPEAT: u64 = u16::MAX as u64;

type Result<T> = std::result::Result<T, ProtocolError>;

/// A request that could not be decoded, with its id when one was readable.
#[derive(Debug)]
pub struct Rejected {
    pub id: Option<u64>,
    pub error: ProtocolError,
}

// ============================================================================
// Lines
// ============================================================================

#[derive(Debug, PartialEq)]
enum EncodedChar<'a> {
    Bare(&'a str),
    Styled(&'a str, u16),
}

impl EncodedChar<'_> {
    fn to_value(&self) -> Value {
        match self {
            EncodedChar::Bare(data) => Value::from(*data),
            EncodedChar::Styled(data, spec) => json!([data, spec]),
        }
    }
}

fn encode_char(cell: &Cell) -> EncodedChar<'_> {
    let spec = cell.spec();
    if spec.is_default() {
        EncodedChar::Bare(&cell.data)
    } else {
        EncodedChar::Styled(&cell.data, spec.0)
    }
}

/// Encode a line, collapsing runs of identical characters into repetition counts.
pub fn encode_line(line: &[Cell]) -> Value {
    let mut out = Vec::with_capacity(line.len());
    let mut last: Option<EncodedChar<'_>> = None;
    let mut repeats: u64 = 0;

    for cell in line {
        let encoded = encode_char(cell);
        if last.as_ref() == Some(&encoded) {
            repeats += 1;
            continue;
        }
        if repeats > 0 {
            out.push(Value::from(repeats));
            repeats = 0;
        }
        out.push(encoded.to_value());
        last = Some(encoded);
    }
    if repeats > 0 {
        out.push(Value::from(repeats));
    }

    Value::Array(out)
}

/// Decode a line, expanding repetition counts. Bare characters get color spec 56.
pub fn decode_line(value: &Value) -> Result<Line> {
    let items = value
        .as_array()
        .ok_or_else(|| ProtocolError::malformed("line", value.to_string()))?;

    let mut line: Line = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(data) => line.push(Cell::plain(data.clone())),
            Value::Array(pair) => line.push(decode_pair(pair)?),
            Value::Number(n) => {
                let count = n
                    .as_u64()
                    .filter(|c| *c <= MAX_REPEAT)
                    .ok_or_else(|| ProtocolError::malformed("repetition count", n.to_string()))?;
                let previous = line.last().cloned().ok_or(ProtocolError::DanglingRepeat)?;
                line.extend(std::iter::repeat_n(previous, count as usize));
            }
            other => return Err(ProtocolError::malformed("line item", other.to_string())),
        }
    }
    Ok(line)
}

fn decode_pair(pair: &[Value]) -> Result<Cell> {
    match pair {
        [Value::String(data), spec] => {
            let spec = spec
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .ok_or_else(|| ProtocolError::malformed("color spec", spec.to_string()))?;
            Ok(Cell::with_spec(data.clone(), ColorSpec(spec)))
        }
        _ => Err(ProtocolError::malformed(
            "character",
            Value::Array(pair.to_vec()).to_string(),
        )),
    }
}

fn encode_change(change: &ChangeRecord) -> Value {
    json!([change.seq, change.line_number, encode_line(&change.line)])
}

fn decode_change(value: &Value) -> Result<ChangeRecord> {
    match value.as_array().map(Vec::as_slice) {
        Some([seq, line_number, line]) => Ok(ChangeRecord {
            seq: as_u64(seq, "sequence number")?,
            line_number: u32::try_from(as_u64(line_number, "line number")?)
                .map_err(|_| ProtocolError::malformed("line number", line_number.to_string()))?,
            line: decode_line(line)?,
        }),
        _ => Err(ProtocolError::malformed("change", value.to_string())),
    }
}

// ============================================================================
// Message bodies
// ============================================================================

fn as_u64(value: &Value, what: &'static str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| ProtocolError::malformed(what, value.to_string()))
}

fn as_str<'a>(value: &'a Value, what: &'static str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ProtocolError::malformed(what, value.to_string()))
}

fn arg<'a>(args: &'a [Value], index: usize, what: &'static str) -> Result<&'a Value> {
    args.get(index).ok_or(ProtocolError::MissingField(what))
}

/// Split a body into its tag and arguments.
fn split_body(value: &Value) -> Result<(&str, &[Value])> {
    let items = value
        .as_array()
        .ok_or_else(|| ProtocolError::malformed("message body", value.to_string()))?;
    let (tag, args) = items.split_first().ok_or(ProtocolError::MissingField("tag"))?;
    Ok((as_str(tag, "tag")?, args))
}

fn decode_key(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(text) => Ok(text.as_bytes().to_vec()),
        Value::Array(codes) => codes
            .iter()
            .map(|code| {
                code.as_u64()
                    .and_then(|c| u8::try_from(c).ok())
                    .ok_or_else(|| ProtocolError::malformed("key code", code.to_string()))
            })
            .collect(),
        Value::Number(n) => n
            .as_u64()
            .and_then(|c| u8::try_from(c).ok())
            .map(|c| vec![c])
            .ok_or_else(|| ProtocolError::malformed("key code", n.to_string())),
        other => Err(ProtocolError::malformed("key", other.to_string())),
    }
}

impl Request {
    pub fn to_value(&self) -> Value {
        match self {
            Request::Changes { since } => json!([Self::CHANGES, since]),
            Request::Keypress { key } => json!([Self::KEYPRESS, key]),
            Request::Chat { text } => json!([Self::CHAT, text]),
            Request::Hello { session: None } => json!([Self::HELLO, "hello"]),
            Request::Hello { session: Some(session) } => json!([Self::HELLO, "hello", session]),
            other => json!([other.tag()]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (tag, args) = split_body(value)?;
        let request = match tag {
            Self::CHANGES => Request::Changes {
                since: as_u64(arg(args, 0, "change number")?, "change number")?,
            },
            Self::SCREEN => Request::Screen,
            Self::SETTINGS => Request::Settings,
            Self::HELLO => Request::Hello {
                session: match args.get(1) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(as_str(value, "session")?)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                },
            },
            Self::KEYPRESS => Request::Keypress {
                key: decode_key(arg(args, 0, "key")?)?,
            },
            Self::LEAVE => Request::Leave,
            Self::CHAT => Request::Chat {
                text: as_str(arg(args, 0, "message")?, "message")?.to_string(),
            },
            Self::OWNER => Request::Owner,
            other => Request::Unrecognized {
                tag: other.to_string(),
            },
        };
        Ok(request)
    }
}

impl Response {
    pub fn tag(&self) -> &'static str {
        match self {
            Response::Hello => "h",
            Response::Changes(_) => "?",
            Response::Screen { .. } => "%",
            Response::Settings(_) => "s",
            Response::Chat { .. } => ":",
            Response::Owner(_) => "~",
            Response::Error(_) => "e",
            Response::Status(_) => "u",
            Response::Ok => "o",
            Response::Cursor(_) => "_",
        }
    }

    pub fn to_value(&self) -> Value {
        let tag = self.tag();
        match self {
            Response::Hello => json!([tag, "hello"]),
            Response::Changes(changes) => {
                let changes: Vec<Value> = changes.iter().map(encode_change).collect();
                json!([tag, changes])
            }
            Response::Screen { lines, next_seq } => {
                let lines: Vec<Value> = lines.iter().map(|l| encode_line(l)).collect();
                json!([tag, lines, next_seq])
            }
            Response::Settings(settings) => json!([tag, settings]),
            Response::Chat { sender, text } => json!([tag, sender, text]),
            Response::Owner(state) => json!([tag, state.code()]),
            Response::Error(text) | Response::Status(text) => json!([tag, text]),
            Response::Ok => json!([tag]),
            Response::Cursor(cursor) => json!([tag, cursor.x, cursor.y]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (tag, args) = split_body(value)?;
        let response = match tag {
            "h" => Response::Hello,
            "?" => {
                let changes = arg(args, 0, "changes")?
                    .as_array()
                    .ok_or_else(|| ProtocolError::malformed("changes", value.to_string()))?;
                Response::Changes(changes.iter().map(decode_change).collect::<Result<_>>()?)
            }
            "%" => {
                let lines = arg(args, 0, "lines")?
                    .as_array()
                    .ok_or_else(|| ProtocolError::malformed("lines", value.to_string()))?;
                Response::Screen {
                    lines: lines.iter().map(decode_line).collect::<Result<_>>()?,
                    next_seq: as_u64(arg(args, 1, "change number")?, "change number")?,
                }
            }
            "s" => Response::Settings(TerminalSettings::deserialize_value(arg(
                args, 0, "settings",
            )?)?),
            ":" => Response::Chat {
                sender: as_str(arg(args, 0, "sender")?, "sender")?.to_string(),
                text: as_str(arg(args, 1, "message")?, "message")?.to_string(),
            },
            "~" => {
                let code = as_u64(arg(args, 0, "owner")?, "owner")?;
                Response::Owner(
                    OwnerState::from_code(code)
                        .ok_or_else(|| ProtocolError::malformed("owner", code.to_string()))?,
                )
            }
            "e" => Response::Error(as_str(arg(args, 0, "error")?, "error")?.to_string()),
            "u" => Response::Status(as_str(arg(args, 0, "status")?, "status")?.to_string()),
            "o" => Response::Ok,
            "_" => Response::Cursor(Cursor {
                x: as_coordinate(arg(args, 0, "x")?)?,
                y: as_coordinate(arg(args, 1, "y")?)?,
            }),
            other => return Err(ProtocolError::malformed("response tag", other)),
        };
        Ok(response)
    }
}

fn as_coordinate(value: &Value) -> Result<u32> {
    u32::try_from(as_u64(value, "coordinate")?)
        .map_err(|_| ProtocolError::malformed("coordinate", value.to_string()))
}

impl TerminalSettings {
    fn deserialize_value(value: &Value) -> Result<Self> {
        Ok(serde::Deserialize::deserialize(value)?)
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Serialize a request envelope: `{"id": id, "request": body}`.
pub fn pack_request(envelope: &RequestEnvelope) -> String {
    json!({ "id": envelope.id, "request": envelope.request.to_value() }).to_string()
}

/// Parse a request envelope, keeping the id around when the body is unusable.
pub fn unpack_request(text: &str) -> std::result::Result<RequestEnvelope, Rejected> {
    let value: Value = serde_json::from_str(text).map_err(|e| Rejected {
        id: None,
        error: e.into(),
    })?;
    let id = value.get("id").and_then(Value::as_u64);
    let reject = move |error: ProtocolError| Rejected { id, error };

    let id = id.ok_or_else(|| reject(ProtocolError::MissingField("id")))?;
    let body = value
        .get("request")
        .ok_or_else(|| reject(ProtocolError::MissingField("request")))?;
    let request = Request::from_value(body).map_err(reject)?;
    Ok(RequestEnvelope { id, request })
}

/// Serialize a response envelope: `{"id": id, "response": body}`, id omitted for broadcasts.
pub fn pack_response(envelope: &ResponseEnvelope) -> String {
    let mut object = Map::new();
    if let Some(id) = envelope.id {
        object.insert("id".to_string(), Value::from(id));
    }
    object.insert("response".to_string(), envelope.response.to_value());
    Value::Object(object).to_string()
}

pub fn unpack_response(text: &str) -> Result<ResponseEnvelope> {
    let value: Value = serde_json::from_str(text)?;
    let id = match value.get("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(as_u64(id, "id")?),
    };
    let body = value
        .get("response")
        .ok_or(ProtocolError::MissingField("response"))?;
    Ok(ResponseEnvelope {
        id,
        response: Response::from_value(body)?,
    })
}
