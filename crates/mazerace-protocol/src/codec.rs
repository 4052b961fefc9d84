//! Codec trait and the JSON implementation.
//!
//! The connection write pump encodes every outbound [`Response`] through a
//! [`Codec`], and the read pump decodes raw frames into an [`Envelope`]
//! before typed parsing.
//!
//! [`Response`]: crate::Response
//! [`Envelope`]: crate::Envelope

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Converts between Rust values and frame bytes.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes a frame into a value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`. Frames are UTF-8 JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, GameMode, Response};

    #[test]
    fn test_json_codec_encodes_response_as_text() {
        let bytes = JsonCodec
            .encode(&Response::QueueJoined {
                game_mode: GameMode::Race,
            })
            .unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(
            text,
            r#"{"messageType":"queue_joined","payload":{"game_mode":"race"}}"#
        );
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"not json{");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
