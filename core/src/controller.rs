//! The per-screen request controller.
//!
//! # Design
//! A `Controller` ties one listener to the shared `HttpManager` and to the
//! consumer thread's `Dispatcher`. `load` encodes the input, builds the
//! request, submits it and returns; the decoded outcome later reaches the
//! listener on the consumer thread.
//!
//! The controller tracks only the most recent call, and reports it through
//! `in_flight` until it executes or is cancelled. Starting a new load
//! replaces that handle without cancelling the previous request, whose
//! outcome is still delivered. `on_destroy` cancels the tracked call if it
//! has not executed.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::delivery::{Dispatcher, Listener};
use crate::envelope::{decode, DecodeTarget, Envelope, Interceptor, Outcome, ResponseEnvelope};
use crate::error::{PipelineError, Result};
use crate::executor::{Call, HttpManager};
use crate::params::{self, ParamsEncoding, ToParams};
use crate::request::{self, RequestDescriptor};

/// Issues requests for one listener and decodes their responses into `T`.
pub struct Controller<T, E = Envelope> {
    manager: Arc<HttpManager>,
    dispatcher: Dispatcher,
    listener: Option<Arc<dyn Listener<T>>>,
    interceptor: Option<Arc<Interceptor<E>>>,
    encoding: ParamsEncoding,
    tag: String,
    call: Option<Call>,
}

impl<T, E> Controller<T, E>
where
    T: DeserializeOwned + Send + 'static,
    E: ResponseEnvelope,
{
    /// Create a controller tagged with its own type name.
    pub fn new(manager: Arc<HttpManager>, dispatcher: Dispatcher) -> Self {
        let encoding = manager.config().params_encoding;
        Self {
            manager,
            dispatcher,
            listener: None,
            interceptor: None,
            encoding,
            tag: std::any::type_name::<Self>().to_string(),
            call: None,
        }
    }

    /// Replace the tag used to group this controller's requests.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_listener(&mut self, listener: Arc<dyn Listener<T>>) {
        self.listener = Some(listener);
    }

    /// Install a hook that sees each parsed envelope first. When it returns
    /// `true`, the listener is not called for that response.
    pub fn set_interceptor<F>(&mut self, interceptor: F)
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(interceptor));
    }

    /// Override the parameter encoding taken from the manager's config.
    pub fn set_params_encoding(&mut self, encoding: ParamsEncoding) {
        self.encoding = encoding;
    }

    /// The most recently submitted call while it is still pending. `None`
    /// once it has executed or been cancelled.
    pub fn in_flight(&self) -> Option<&Call> {
        self.call
            .as_ref()
            .filter(|call| !call.is_executed() && !call.is_cancelled())
    }

    /// Start a request. Returns once it is submitted.
    ///
    /// Fails immediately if no listener is bound or the descriptor's URL is
    /// unusable; every later failure reaches the listener's `on_error`.
    pub fn load<P>(&mut self, descriptor: &RequestDescriptor, input: &P, target: DecodeTarget<T>) -> Result<()>
    where
        P: ToParams + ?Sized,
    {
        let listener = self
            .listener
            .clone()
            .ok_or_else(|| PipelineError::Configuration("no listener bound to controller".to_string()))?;

        let encoded = params::encode(Some(input), self.encoding, request::body_mode(descriptor.method()));
        let request = request::build(descriptor, encoded, &self.tag)?;

        let dispatcher = self.dispatcher.clone();
        let interceptor = self.interceptor.clone();
        let call = self.manager.submit(request, move |result| {
            let outcome = match result {
                Ok(response) => decode::<E, T>(&response.body, &target, interceptor.as_deref()),
                Err(err) => Some(Outcome::Failure(err.to_string())),
            };
            if let Some(outcome) = outcome {
                dispatcher.deliver(listener, outcome);
            }
        });

        if let Some(previous) = self.call.replace(call) {
            if !previous.is_executed() && !previous.is_cancelled() {
                debug!(call = %previous.id(), tag = %self.tag, "previous call still running");
            }
        }
        Ok(())
    }

    /// Cancel the tracked call if it has not executed yet.
    pub fn on_destroy(&mut self) {
        if let Some(call) = self.call.take() {
            call.cancel();
        }
    }
}

impl<I, E> Controller<Vec<I>, E>
where
    I: DeserializeOwned + Send + 'static,
    E: ResponseEnvelope,
{
    /// Start a request whose `data` is a list of `I`.
    pub fn load_list<P>(&mut self, descriptor: &RequestDescriptor, input: &P) -> Result<()>
    where
        P: ToParams + ?Sized,
    {
        self.load(descriptor, input, DecodeTarget::list())
    }
}

impl<T, E> fmt::Debug for Controller<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("tag", &self.tag)
            .field("encoding", &self.encoding)
            .field("listener", &self.listener.is_some())
            .field("call", &self.call)
            .finish()
    }
}
