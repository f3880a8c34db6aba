use std::fmt::Debug;

use thiserror::Error;

/// Failures of the shared bridge plumbing: settings, transport and payloads.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("Zenoh: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR payload: {0}")]
    Cbor(String),
}

impl<E: Debug> From<ciborium::ser::Error<E>> for Error {
    fn from(e: ciborium::ser::Error<E>) -> Self {
        Error::Cbor(e.to_string())
    }
}

impl<E: Debug> From<ciborium::de::Error<E>> for Error {
    fn from(e: ciborium::de::Error<E>) -> Self {
        Error::Cbor(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
