//! Asynchronous HTTP request pipeline with envelope decoding.
//!
//! # Overview
//! A `Controller` turns a URL descriptor and a parameter payload into an
//! HTTP request, runs it on the shared `HttpManager`'s worker pool, decodes
//! the `{status, message, data}` envelope into the declared output type and
//! hands the result to a listener on one consumer thread.
//!
//! # Design
//! - Request building (`params`, `request`) and decoding (`envelope`) are
//!   pure and work on plain-data `HttpRequest` / `HttpResponse` values.
//! - Network I/O sits behind the `Transport` trait; `UreqTransport` is the
//!   default.
//! - Results cross threads only through `delivery`: workers post, the
//!   thread owning the `MainLoop` runs listeners one at a time.
//! - The library logs through `tracing` and installs no subscriber.

pub mod cache;
pub mod config;
pub mod controller;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod http;
pub mod params;
pub mod request;

pub use cache::{CacheConfig, ResponseCache};
pub use config::{HttpConfig, HttpConfigBuilder};
pub use controller::Controller;
pub use delivery::{Dispatcher, Listener, MainLoop};
pub use envelope::{decode, DecodeTarget, Envelope, Outcome, ResponseEnvelope, TargetKind};
pub use error::{PipelineError, Result};
pub use executor::{Call, HttpManager, Transport, UreqTransport};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
pub use params::{encode, BodyMode, EncodedBody, Fields, ParamsEncoding, ToParams};
pub use request::{build, RequestDescriptor};
