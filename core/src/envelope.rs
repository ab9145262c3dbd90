//! Response envelope decoding.
//!
//! # Design
//! Every response body is a `{status, message, data}` envelope. Decoding
//! happens in two layers: the body is parsed into the configured envelope
//! type, then `data` is decoded into whatever the caller declared through
//! its `DecodeTarget`.
//!
//! `decode` returns `None` in two situations where nothing must be delivered:
//! the interceptor claimed the envelope, or a single-value target met a
//! blank `data` field.

use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// The outer shape every response body must satisfy.
///
/// Implemented by the default `Envelope` and by application-specific
/// envelopes that carry extra fields.
pub trait ResponseEnvelope: DeserializeOwned + Send + 'static {
    fn status(&self) -> &str;
    fn message(&self) -> &str;
    fn data(&self) -> &Value;
}

/// The default three-field envelope.
///
/// `status` and `message` accept JSON strings, numbers and booleans; all
/// three fields may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ResponseEnvelope for Envelope {
    fn status(&self) -> &str {
        &self.status
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn data(&self) -> &Value {
        &self.data
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{status:{}, message:{}, data:{}}}",
            self.status, self.message, self.data
        )
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!("expected a scalar, found {other}"))),
    }
}

/// The result of one request, as seen by the listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(String),
}

/// How `data` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// `data` decodes into one value.
    Single,
    /// `data` decodes into a sequence; null or blank becomes empty.
    List,
    /// The output is envelope-shaped; the whole body decodes into it.
    Envelope,
}

/// The declared output shape for a request.
///
/// Constructed through `single`, `list` or `envelope`, so exactly one mode
/// is active and the output type always matches it.
pub struct DecodeTarget<T> {
    kind: TargetKind,
    empty: Option<fn() -> T>,
}

impl<T: DeserializeOwned> DecodeTarget<T> {
    pub fn single() -> Self {
        Self {
            kind: TargetKind::Single,
            empty: None,
        }
    }
}

impl<I: DeserializeOwned> DecodeTarget<Vec<I>> {
    pub fn list() -> Self {
        Self {
            kind: TargetKind::List,
            empty: Some(Vec::new),
        }
    }
}

impl<T: ResponseEnvelope> DecodeTarget<T> {
    pub fn envelope() -> Self {
        Self {
            kind: TargetKind::Envelope,
            empty: None,
        }
    }
}

impl<T> Clone for DecodeTarget<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DecodeTarget<T> {}

impl<T> fmt::Debug for DecodeTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeTarget")
            .field("kind", &self.kind)
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

/// Hook that sees every parsed envelope before `data` is decoded. Returning
/// `true` stops decoding; nothing is delivered for that response.
pub type Interceptor<E> = dyn Fn(&E) -> bool + Send + Sync;

/// Decode a raw response body.
///
/// Parse errors become `Failure("data parse failed")`; `None` means the
/// response was claimed by the interceptor or carried no data.
pub fn decode<E, T>(
    raw: &str,
    target: &DecodeTarget<T>,
    interceptor: Option<&Interceptor<E>>,
) -> Option<Outcome<T>>
where
    E: ResponseEnvelope,
    T: DeserializeOwned,
{
    match try_decode(raw, target, interceptor) {
        Ok(Some(value)) => Some(Outcome::Success(value)),
        Ok(None) => None,
        Err(err) => Some(Outcome::Failure(err.to_string())),
    }
}

fn try_decode<E, T>(
    raw: &str,
    target: &DecodeTarget<T>,
    interceptor: Option<&Interceptor<E>>,
) -> Result<Option<T>>
where
    E: ResponseEnvelope,
    T: DeserializeOwned,
{
    let body = raw.trim();
    let parsed: Value = serde_json::from_str(body).map_err(|_| PipelineError::EnvelopeParse)?;
    let envelope = E::deserialize(&parsed).map_err(|_| PipelineError::EnvelopeParse)?;

    if let Some(intercept) = interceptor {
        if intercept(&envelope) {
            debug!(status = envelope.status(), "envelope claimed by interceptor");
            return Ok(None);
        }
    }

    if target.kind == TargetKind::Envelope {
        return Ok(Some(T::deserialize(&parsed)?));
    }

    let data = envelope.data();
    let text = match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match target.kind {
        TargetKind::List => {
            if text.trim().is_empty() {
                return Ok(target.empty.map(|empty| empty()));
            }
            let items: Option<T> = serde_json::from_str(&text)?;
            Ok(items.or_else(|| target.empty.map(|empty| empty())))
        }
        _ => {
            if text.trim().is_empty() {
                debug!(status = envelope.status(), "envelope data is blank; nothing to deliver");
                return Ok(None);
            }
            debug!(response = body, "response");
            match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                // A bare JSON string such as "ok" is not itself valid JSON text.
                Err(_) if data.is_string() => Ok(Some(T::deserialize(data)?)),
                Err(err) => Err(err.into()),
            }
        }
    }
}
