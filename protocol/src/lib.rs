//! The wire contract between the game server and its clients.
//! Also contains the response envelope with the error tagging rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every request is a UTF-8 JSON document terminated by this four byte
/// sentinel: `E`, `O`, `T`, `0x00`. The response is bare JSON, the server
/// closes the connection to mark the end of the reply.
pub const END_OF_TRANSMISSION: [u8; 4] = [0x45, 0x4F, 0x54, 0x00];

/// Appends the end-of-transmission sentinel to a serialized request.
/// This is the client side counterpart of the server side frame reader.
pub fn frame_request(body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(body.len() + END_OF_TRANSMISSION.len());
    framed.extend_from_slice(body);
    framed.extend_from_slice(&END_OF_TRANSMISSION);
    framed
}

/// The component an error originates from. The tag is prepended to string
/// error messages so clients can tell a transport problem from a rejected
/// move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Transport level problems: framing, decoding, timeouts.
    Server,
    /// Protocol level problems: bad fields, unknown sessions, admission.
    Framework,
    /// Rejections issued by a game implementation.
    Game,
}

impl ErrorSource {
    fn tag(self) -> &'static str {
        match self {
            ErrorSource::Server => "server",
            ErrorSource::Framework => "framework",
            ErrorSource::Game => "game",
        }
    }
}

/// The envelope every reply is wrapped in. Exactly one response is sent per
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// The request succeeded, `data` carries the payload (`null` for
    /// requests without one).
    Ok { data: Value },
    /// The request failed, `message` carries the tagged error text or a
    /// structured payload handed through from a game.
    Error { message: Value },
}

impl Response {
    /// A success reply with a payload.
    pub fn ok(data: Value) -> Self {
        Response::Ok { data }
    }

    /// A success reply without a payload.
    pub fn ok_empty() -> Self {
        Response::Ok { data: Value::Null }
    }

    /// An error reply. String messages get the source tag prepended as
    /// `<source>: <text>`. Any other JSON value is passed through verbatim,
    /// which lets games report structured rejection payloads.
    pub fn error(source: ErrorSource, message: Value) -> Self {
        let message = match message {
            Value::String(text) => Value::String(format!("{}: {}", source.tag(), text)),
            other => other,
        };
        Response::Error { message }
    }

    /// Convenience for the common case of a plain text error.
    pub fn error_text(source: ErrorSource, message: impl Into<String>) -> Self {
        Response::error(source, Value::String(message.into()))
    }
}
