//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! request builder produces `HttpRequest` values and the envelope decoder
//! consumes `HttpResponse` values; only a `Transport` implementation ever
//! touches the network. Keeping the wire step behind plain data makes the
//! builder and decoder deterministic and easy to test with scripted
//! transports.
//!
//! All fields use owned types (`String`, `Vec`) so values can be moved onto
//! worker threads without lifetime concerns.

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    /// Methods whose parameters travel in the URL query string.
    pub fn carries_query(self) -> bool {
        matches!(self, Self::Get | Self::Delete | Self::Head | Self::Put)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body attached to POST, PUT and PATCH requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` fields. Values are already
    /// percent-encoded with the configured parameter encoding.
    Form(Vec<(String, String)>),

    /// Plain-text payload sent verbatim.
    Text(String),
}

impl RequestBody {
    /// Render the body as the bytes that go on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Form(fields) => fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
            Self::Text(text) => text.clone(),
        }
    }
}

/// An HTTP request described as plain data.
///
/// Built by `request::build`. The `tag` groups requests issued by the same
/// controller type so the manager can cancel them together.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub tag: String,
}

/// An HTTP response described as plain data.
///
/// Produced by a `Transport` after executing an `HttpRequest`, then handed
/// to the envelope decoder.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Only a plain 200 counts as success; other 2xx codes do not.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}
