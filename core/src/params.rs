//! Request parameter encoding.
//!
//! # Design
//! A payload is anything that can list itself as key/value pairs
//! (`ToParams`). Maps and pair lists implement it directly; arbitrary
//! records go through `Fields`, which uses their `Serialize` impl to pull
//! out top-level fields instead of inspecting the type at runtime.
//!
//! Values are percent-encoded with the configured `ParamsEncoding`; keys are
//! passed through untouched. The same per-value encoding is used for the
//! query-string and the form-body shape.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Character encoding applied to parameter values before percent-encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamsEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1. Characters outside the Latin-1 range become `?`.
    Latin1,
}

impl ParamsEncoding {
    /// Resolve an encoding from its label, case-insensitively.
    pub fn from_label(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Self::Latin1),
            other => Err(PipelineError::Configuration(format!(
                "unsupported parameter encoding: {other}"
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "ISO-8859-1",
        }
    }

    /// Percent-encode a single value.
    pub fn encode_value(self, value: &str) -> String {
        match self {
            Self::Utf8 => urlencoding::encode(value).into_owned(),
            Self::Latin1 => {
                let bytes: Vec<u8> = value
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect();
                urlencoding::encode_binary(&bytes).into_owned()
            }
        }
    }
}

impl Display for ParamsEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for ParamsEncoding {
    type Error = PipelineError;

    fn try_from(label: String) -> Result<Self> {
        Self::from_label(&label)
    }
}

impl From<ParamsEncoding> for String {
    fn from(encoding: ParamsEncoding) -> Self {
        encoding.label().to_string()
    }
}

/// A request payload that can be flattened into key/value pairs.
///
/// Iteration order must be stable for a given value; it need not be sorted.
pub trait ToParams {
    fn to_params(&self) -> Vec<(String, String)>;
}

/// The empty payload.
impl ToParams for () {
    fn to_params(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn to_params(&self) -> Vec<(String, String)> {
        (**self).to_params()
    }
}

impl<T: ToParams> ToParams for Option<T> {
    fn to_params(&self) -> Vec<(String, String)> {
        self.as_ref().map(ToParams::to_params).unwrap_or_default()
    }
}

impl<K: Display, V: Display, S: BuildHasher> ToParams for HashMap<K, V, S> {
    fn to_params(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K: Display, V: Display> ToParams for BTreeMap<K, V> {
    fn to_params(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K: Display, V: Display> ToParams for [(K, V)] {
    fn to_params(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K: Display, V: Display, const N: usize> ToParams for [(K, V); N] {
    fn to_params(&self) -> Vec<(String, String)> {
        self.as_slice().to_params()
    }
}

impl<K: Display, V: Display> ToParams for Vec<(K, V)> {
    fn to_params(&self) -> Vec<(String, String)> {
        self.as_slice().to_params()
    }
}

/// Marshals the public fields of any `Serialize` record into parameters.
///
/// Strings are used as-is, numbers and booleans through their JSON text,
/// nested arrays and objects as compact JSON. `null` fields are skipped.
/// A record that does not serialize to a JSON object yields no parameters.
pub struct Fields<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> ToParams for Fields<'_, T> {
    fn to_params(&self) -> Vec<(String, String)> {
        let object = match serde_json::to_value(self.0) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                warn!(kind = json_kind(&other), "record payload is not an object; sending no params");
                return Vec::new();
            }
            Err(err) => {
                warn!(error = %err, "record payload could not be marshalled; sending no params");
                return Vec::new();
            }
        };

        object
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Which shape the encoded parameters take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Query,
    Form,
}

/// Encoded request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedBody {
    /// `key=value` pairs joined by `&`, ready to append to a URL.
    QueryString(String),
    /// Individual form fields with percent-encoded values.
    FormBody(Vec<(String, String)>),
}

impl EncodedBody {
    /// The body rendered as a single `key=value&...` string.
    pub fn as_query(&self) -> String {
        match self {
            Self::QueryString(query) => query.clone(),
            Self::FormBody(fields) => fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

/// Encode `payload` in the requested shape.
///
/// An absent payload produces an empty body of that shape.
pub fn encode<P>(payload: Option<&P>, encoding: ParamsEncoding, mode: BodyMode) -> EncodedBody
where
    P: ToParams + ?Sized,
{
    let fields: Vec<(String, String)> = payload
        .map(ToParams::to_params)
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = encoding.encode_value(&value);
            (key, value)
        })
        .collect();

    let body = match mode {
        BodyMode::Query => EncodedBody::QueryString(
            fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
        ),
        BodyMode::Form => EncodedBody::FormBody(fields),
    };
    debug!(encoding = %encoding, body = %body.as_query(), "request body");
    body
}
