//! Error taxonomy for the bridge core.
//!
//! Three layers, matching how failures propagate:
//! - [`DecodeError`]: a single frame could not be parsed. Logged, frame
//!   dropped, connection continues.
//! - [`TransportError`]: the socket itself failed. Fatal to the session.
//! - [`ProtocolError`]: the daemon reported or provoked an error that the
//!   state machine classified as fatal, or a caller violated an API
//!   precondition (e.g. sending before the account identity is known).

/// A single inbound frame could not be decoded.
///
/// Never fatal on its own - the caller drops the frame and keeps reading.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not valid JSON at all.
    #[error("malformed JSON frame: {source}")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },

    /// The frame parsed but is not a JSON object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The frame has no `type` tag to dispatch on.
    #[error("frame has no type tag")]
    MissingType,
}

/// Socket-level failure. Fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No candidate socket accepted a connection within the retry window.
    /// Carries the last per-candidate failure (path included).
    #[error("could not connect to signald: {0}")]
    ConnectFailed(String),

    /// Write failed - the daemon is gone or the pipe is broken.
    #[error("write to daemon failed: {source}")]
    WriteFailed {
        #[from]
        source: std::io::Error,
    },

    /// The reader saw EOF or a read error; the connection is over.
    #[error("connection closed: {0}")]
    Closed(String),
}

/// State-machine-level failure.
///
/// Only [`ProtocolError::Fatal`] variants tear the connection down; the
/// rest are programming-error guards surfaced to the embedder.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The daemon sent an error the signature table classifies as fatal
    /// (SQLite-busy, or the generic fallback).
    #[error("daemon error: {0}")]
    Fatal(String),

    /// An operation that embeds the account UUID was attempted before the
    /// daemon confirmed it. Guarded explicitly - never a silent no-op.
    #[error("account identity not yet known (required for {0})")]
    IdentityRequired(&'static str),

    /// Outbound encode failed. Command payloads are plain data, so this
    /// indicates a bug rather than bad input.
    #[error("command encode failed: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },

    /// The transport refused an outbound frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
