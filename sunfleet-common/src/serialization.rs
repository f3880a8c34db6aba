//! Payload encodings for published samples.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Wire encoding of a sample payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Cbor,
}

impl Format {
    /// Guess the encoding of `payload`.
    ///
    /// Every sample is a map, so a JSON payload opens with `{` (or `[` for
    /// lists) while a CBOR map opens with a major-type-5 byte.
    pub fn sniff(payload: &[u8]) -> Format {
        match payload.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{' | b'[') => Format::Json,
            _ => Format::Cbor,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        Ok(match self {
            Format::Json => serde_json::to_vec(value)?,
            Format::Cbor => {
                let mut out = Vec::with_capacity(64);
                ciborium::into_writer(value, &mut out)?;
                out
            }
        })
    }

    pub fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> Result<T> {
        Ok(match self {
            Format::Json => serde_json::from_slice(payload)?,
            Format::Cbor => ciborium::from_reader(payload)?,
        })
    }
}

/// Decode a payload whose encoding is not known up front.
pub fn decode_auto<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Format::sniff(payload).decode(payload)
}
