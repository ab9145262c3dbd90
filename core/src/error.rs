//! Error types for the request pipeline.
//!
//! # Design
//! Configuration problems are returned synchronously from the call that
//! detected them. Everything that goes wrong once a request is in flight
//! (transport, status, envelope, payload) is flattened into the `Failure`
//! string handed to the listener, so the `Display` text of each variant is
//! what the consumer actually sees.

use thiserror::Error;

/// Errors produced while configuring, building, executing or decoding a
/// request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Missing or invalid configuration: empty URL, unknown parameter
    /// encoding, unusable cache directory, no listener bound.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level I/O failure reported by the transport.
    #[error("{0}")]
    Transport(String),

    /// The server answered, but not with HTTP 200.
    #[error("unexpected HTTP status {status}")]
    Protocol { status: u16 },

    /// The response body is not a valid envelope.
    #[error("data parse failed")]
    EnvelopeParse,

    /// The envelope parsed but `data` does not match the declared target.
    #[error("data parse failed")]
    PayloadDecode,

    /// Anything else, carrying the underlying message.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Other(err.to_string())
        } else {
            Self::PayloadDecode
        }
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("invalid url: {err}"))
    }
}

/// A specialized `Result` for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
