//! JSON codec for MetroSync messages.
//!
//! Encoding uses serde's externally tagged enum representation, which yields
//! `{"PlaybackCommand": {...}}` or `{"PlaybackState": {...}}`.
//!
//! Decoding is deliberately looser than `serde_json::from_slice::<SyncMessage>`:
//! the payload is parsed into a generic JSON object first and the message kind
//! is identified by the *presence* of a known top-level key.  Extra top-level
//! keys are ignored, and `PlaybackCommand` wins if a (malformed) payload
//! carries both keys.
//!
//! Every [`CodecError`] is a per-frame problem.  Callers log it, drop the
//! frame, and keep the connection open.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::framing::encode_frame;
use crate::protocol::messages::{PlaybackCommand, PlaybackState, SyncMessage};

const COMMAND_KEY: &str = "PlaybackCommand";
const STATE_KEY: &str = "PlaybackState";

/// Errors that can occur while encoding or decoding a message payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid UTF-8 JSON.
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// The payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The payload carries neither `PlaybackCommand` nor `PlaybackState`.
    #[error("unrecognised message; top-level keys: {keys:?}")]
    UnknownMessage { keys: Vec<String> },

    /// The message kind was recognised but its body does not fit the schema.
    #[error("invalid {kind} body: {source}")]
    InvalidBody {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Serialisation failed (not expected for well-formed Rust values).
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`SyncMessage`] into its compact JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialisation fails.
///
/// # Examples
///
/// ```rust
/// use metrosync_core::{decode_message, encode_message, PlaybackState, SyncMessage};
///
/// let msg = SyncMessage::PlaybackState(PlaybackState::default());
/// let json = encode_message(&msg).unwrap();
/// assert_eq!(json, r#"{"PlaybackState":{"isPlaying":false,"currentSong":null}}"#);
/// assert_eq!(decode_message(json.as_bytes()).unwrap(), msg);
/// ```
pub fn encode_message(msg: &SyncMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::Encode)
}

/// Encodes a [`SyncMessage`] and wraps it in a complete wire frame
/// (length line + payload line).
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialisation fails.
pub fn encode_message_frame(msg: &SyncMessage) -> Result<Vec<u8>, CodecError> {
    let json = encode_message(msg)?;
    Ok(encode_frame(json.as_bytes()))
}

/// Decodes one [`SyncMessage`] from a frame payload.
///
/// Missing optional fields take their defaults (`isPlaying: false`,
/// `currentSong: null`, empty strings).
///
/// # Errors
///
/// Returns [`CodecError`] if the payload is not JSON, not an object, carries
/// no known top-level key, or has a body that cannot be mapped onto the
/// message type (for example an unknown `action`).
pub fn decode_message(payload: &[u8]) -> Result<SyncMessage, CodecError> {
    let value: Value = serde_json::from_slice(payload).map_err(CodecError::MalformedJson)?;
    let Value::Object(mut object) = value else {
        return Err(CodecError::NotAnObject);
    };

    if let Some(body) = object.remove(COMMAND_KEY) {
        return decode_body::<PlaybackCommand>(COMMAND_KEY, body).map(SyncMessage::PlaybackCommand);
    }
    if let Some(body) = object.remove(STATE_KEY) {
        return decode_body::<PlaybackState>(STATE_KEY, body).map(SyncMessage::PlaybackState);
    }

    Err(CodecError::UnknownMessage {
        keys: object_keys(&object),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn decode_body<T: DeserializeOwned>(kind: &'static str, body: Value) -> Result<T, CodecError> {
    serde_json::from_value(body).map_err(|source| CodecError::InvalidBody { kind, source })
}

fn object_keys(object: &Map<String, Value>) -> Vec<String> {
    object.keys().cloned().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
