//! Error types for the protocol layer.
//!
//! Every variant here is recoverable: the connection that produced the
//! frame logs it and keeps reading.

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an outbound message failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not a JSON envelope at all.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope names a type this server does not know.
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    /// A known type arrived where it is not allowed, e.g. a second
    /// `connect` or a command before the handshake.
    #[error("unexpected message type {0:?}")]
    UnexpectedMessageType(String),

    /// The type needs a payload and the envelope had none.
    #[error("payload required for message type {message_type}")]
    PayloadRequired { message_type: &'static str },

    /// The payload does not match the shape of its type.
    #[error("invalid format for {message_type} payload: {source}")]
    PayloadFormat {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload parsed but a field holds an unacceptable value.
    #[error("validation failed for {message_type}: {field} {reason}")]
    Validation {
        message_type: &'static str,
        field: &'static str,
        reason: String,
    },
}
