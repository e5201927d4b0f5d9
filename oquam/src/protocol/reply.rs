//! Reply parsing.
//!
//! The firmware answers every request with one line. The usual shape is an
//! envelope echoing the request opcode, followed by a JSON-style value list
//! and an optional checksum suffix:
//!
//! ```text
//! #M[0]
//! #I[0,1]:7f
//! #![3,"bad arguments"]
//! ```
//!
//! Index 0 of the value list is the status code (0 = success). An opcode of
//! `!` marks an error reply regardless of the request.
//!
//! Identification replies are matched textually against
//! [`IDENTIFY_MARKER`] instead of being decoded as a status list.

use crate::error::{Error, Result};
use crate::protocol::command::Command;
use std::fmt;

/// Prefix a valid identification reply must start with.
pub const IDENTIFY_MARKER: &str = "#?[0,\"Oquam";

/// Opcode used by the firmware for error replies.
pub const ERROR_OPCODE: char = '!';

/// Status code meaning success.
pub const STATUS_OK: i64 = 0;

/// Single scalar in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    /// Integer value.
    Int(i64),
    /// Quoted string value.
    Text(String),
}

impl ReplyValue {
    /// Integer content, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text content, if this is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for ReplyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Parsed status-code reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    opcode: Option<char>,
    values: Vec<ReplyValue>,
}

impl Reply {
    /// Parse a reply line.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(Error::Protocol("empty reply".into()));
        }

        let (opcode, body) = match line.strip_prefix('#') {
            Some(rest) => {
                let op = rest
                    .chars()
                    .next()
                    .ok_or_else(|| Error::Protocol(format!("missing opcode in {line:?}")))?;
                (Some(op), &rest[op.len_utf8()..])
            },
            None => (None, line),
        };

        let list = if body.starts_with('[') {
            let end = body
                .rfind(']')
                .ok_or_else(|| Error::Protocol(format!("unterminated value list in {line:?}")))?;
            let trailer = &body[end + 1..];
            if !trailer.is_empty() && !trailer.starts_with(':') {
                return Err(Error::Protocol(format!(
                    "unexpected data after value list in {line:?}"
                )));
            }
            body[..=end].to_string()
        } else {
            // Bare comma-delimited list, checksum suffix dropped.
            let bare = body
                .split(':')
                .next()
                .unwrap_or_default()
                .trim();
            format!("[{bare}]")
        };

        let values = parse_values(&list).map_err(|e| Error::Protocol(format!("{e} in {line:?}")))?;

        match values.first() {
            Some(ReplyValue::Int(_)) => Ok(Self { opcode, values }),
            Some(ReplyValue::Text(_)) => Err(Error::Protocol(format!(
                "status code is not an integer in {line:?}"
            ))),
            None => Err(Error::Protocol(format!("missing status code in {line:?}"))),
        }
    }

    /// Parse a reply to `command`, checking the echoed opcode when present.
    pub fn parse_for(command: &Command, line: &str) -> Result<Self> {
        let reply = Self::parse(line)?;
        match reply.opcode {
            Some(op) if op != command.opcode() && op != ERROR_OPCODE => Err(Error::Protocol(
                format!(
                    "reply opcode '{op}' does not match request '{}'",
                    command.opcode()
                ),
            )),
            Some(ERROR_OPCODE) if reply.status() == STATUS_OK => Err(Error::Protocol(
                "error reply without error code".into(),
            )),
            _ => Ok(reply),
        }
    }

    /// Echoed opcode, if the reply used the envelope form.
    pub fn opcode(&self) -> Option<char> {
        self.opcode
    }

    /// Status code at index 0.
    pub fn status(&self) -> i64 {
        self.values
            .first()
            .and_then(ReplyValue::as_int)
            .unwrap_or_default()
    }

    /// Whether the status code signals success.
    pub fn is_success(&self) -> bool {
        self.status() == STATUS_OK
    }

    /// All values, status code included.
    pub fn values(&self) -> &[ReplyValue] {
        &self.values
    }

    /// Command-specific payload following the status code.
    pub fn payload(&self) -> &[ReplyValue] {
        &self.values[1..]
    }

    /// Integer value at `index`.
    pub fn int_at(&self, index: usize) -> Result<i64> {
        self.values
            .get(index)
            .and_then(ReplyValue::as_int)
            .ok_or_else(|| Error::Protocol(format!("expected an integer at reply index {index}")))
    }

    /// Turn a nonzero status code into [`Error::Device`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self
            .values
            .get(1)
            .and_then(ReplyValue::as_text)
            .map(str::to_string);
        Err(Error::Device {
            code: self.status(),
            message,
        })
    }
}

fn parse_values(list: &str) -> std::result::Result<Vec<ReplyValue>, String> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(list).map_err(|e| format!("malformed value list ({e})"))?;

    raw.into_iter()
        .map(|value| match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ReplyValue::Int)
                .ok_or_else(|| format!("non-integer number {n}")),
            serde_json::Value::String(s) => Ok(ReplyValue::Text(s)),
            other => Err(format!("unsupported value {other}")),
        })
        .collect()
}

/// Successful identification reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    device: String,
    raw: String,
}

impl Identification {
    /// Validate an identification line.
    ///
    /// Only surrounding whitespace is removed; the marker match is
    /// case-sensitive.
    pub fn parse(line: &str) -> Result<Self> {
        let raw = line.trim();
        if !raw.starts_with(IDENTIFY_MARKER) {
            return Err(Error::Protocol(format!(
                "unexpected identification frame: {raw:?}"
            )));
        }

        // Name starts right after the opening quote of the marker.
        let name_start = IDENTIFY_MARKER.len() - "Oquam".len();
        let device = raw[name_start..]
            .split('"')
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            device,
            raw: raw.to_string(),
        })
    }

    /// Device name reported by the firmware (e.g. `Oquam-Stage-1`).
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Reply line as received, trimmed.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}
