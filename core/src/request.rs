//! Outbound request construction.
//!
//! # Design
//! `build` is a pure function from a descriptor and encoded parameters to an
//! `HttpRequest`. How the parameters travel depends only on the method:
//!
//! | Method | URL | Body |
//! |---|---|---|
//! | GET, DELETE, HEAD | extended with the query string | none |
//! | PUT | extended with the query string | plain text, the encoded string |
//! | POST | unchanged | form fields |
//! | PATCH | unchanged | plain text, the encoded string |

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::http::{HttpMethod, HttpRequest, RequestBody};
use crate::params::{BodyMode, EncodedBody};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// Target URL plus HTTP method for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: HttpMethod,
    url: String,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The descriptor's URL extended with `query`. Existing query
    /// parameters and any fragment are preserved.
    pub fn url_with_query(&self, query: &str) -> String {
        if query.is_empty() {
            return self.url.clone();
        }
        let (base, fragment) = match self.url.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (self.url.as_str(), None),
        };
        let mut url = String::with_capacity(base.len() + query.len() + 1);
        url.push_str(base);
        if !base.contains('?') {
            url.push('?');
        } else if !base.ends_with('?') && !base.ends_with('&') {
            url.push('&');
        }
        url.push_str(query);
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

/// The parameter shape a method expects from the encoder.
pub fn body_mode(method: HttpMethod) -> BodyMode {
    match method {
        HttpMethod::Post => BodyMode::Form,
        _ => BodyMode::Query,
    }
}

/// Build the outbound request for `descriptor`.
///
/// Fails with `Configuration` when the URL is empty or unparseable.
pub fn build(descriptor: &RequestDescriptor, body: EncodedBody, tag: &str) -> Result<HttpRequest> {
    if descriptor.url.trim().is_empty() {
        return Err(PipelineError::Configuration("request url is empty".to_string()));
    }
    url::Url::parse(&descriptor.url)?;

    let method = descriptor.method;
    let query = body.as_query();
    let url = if method.carries_query() {
        descriptor.url_with_query(&query)
    } else {
        descriptor.url.clone()
    };
    let body = match method {
        HttpMethod::Get | HttpMethod::Delete | HttpMethod::Head => None,
        HttpMethod::Post => Some(RequestBody::Form(into_fields(body))),
        HttpMethod::Put | HttpMethod::Patch => Some(RequestBody::Text(query)),
    };

    let headers = match &body {
        Some(RequestBody::Form(_)) => vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
        Some(RequestBody::Text(_)) => vec![("content-type".to_string(), TEXT_CONTENT_TYPE.to_string())],
        None => Vec::new(),
    };

    debug!(%method, %url, tag, "request url");
    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
        tag: tag.to_string(),
    })
}

fn into_fields(body: EncodedBody) -> Vec<(String, String)> {
    match body {
        EncodedBody::FormBody(fields) => fields,
        EncodedBody::QueryString(query) => query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect(),
    }
}
