//! Client configuration.
//!
//! # Design
//! `HttpConfig` is plain data that can be built in code through
//! `HttpConfigBuilder` or loaded from JSON. A zero timeout means "use the
//! default", so partially filled files behave the same as an explicit 10s.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{PipelineError, Result};
use crate::params::ParamsEncoding;

/// Default connect, read and write timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of worker threads driving requests.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Configuration for an `HttpManager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub worker_threads: usize,
    pub params_encoding: ParamsEncoding,
    pub cache: Option<CacheConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_TIMEOUT_SECS,
            worker_threads: DEFAULT_WORKER_THREADS,
            params_encoding: ParamsEncoding::Utf8,
            cache: None,
        }
    }
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }

    /// Parse a JSON configuration document. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| PipelineError::Configuration(format!("invalid http config: {err}")))
    }

    pub fn connect_timeout(&self) -> Duration {
        secs_or_default(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        secs_or_default(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        secs_or_default(self.write_timeout_secs)
    }

    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            DEFAULT_WORKER_THREADS
        } else {
            self.worker_threads
        }
    }
}

fn secs_or_default(secs: u64) -> Duration {
    if secs == 0 {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    } else {
        Duration::from_secs(secs)
    }
}

/// Round up to whole seconds so a sub-second timeout never reads as zero.
fn whole_secs(timeout: Duration) -> u64 {
    if timeout.subsec_nanos() > 0 {
        timeout.as_secs() + 1
    } else {
        timeout.as_secs()
    }
}

/// Builder for `HttpConfig`.
///
/// Timeouts are kept in whole seconds; fractional values round up.
#[derive(Debug, Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_secs = whole_secs(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_secs = whole_secs(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout_secs = whole_secs(timeout);
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    pub fn params_encoding(mut self, encoding: ParamsEncoding) -> Self {
        self.config.params_encoding = encoding;
        self
    }

    /// Enable the response cache in `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache = Some(CacheConfig::new(dir));
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    pub fn build(self) -> HttpConfig {
        self.config
    }
}
