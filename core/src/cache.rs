//! Directory-backed cache for successful GET responses.
//!
//! Each entry is one JSON file named after a SHA-256 of the request URL, so
//! names stay valid across builds. An
//! entry is served while it is younger than `max_age_secs`; stale or
//! unreadable entries are treated as misses.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::http::HttpResponse;

/// Default freshness window for cached responses, in seconds.
pub const DEFAULT_MAX_AGE_SECS: u64 = 10;

/// Where cached responses live and how long they stay fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: PathBuf,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE_SECS
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Serialize, Deserialize)]
struct CachedEntry {
    url: String,
    stored_at_secs: u64,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// On-disk store of successful GET responses.
#[derive(Debug)]
pub struct ResponseCache {
    dir: PathBuf,
    max_age: Duration,
}

impl ResponseCache {
    /// Open (creating if needed) the cache directory.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(|err| {
            PipelineError::Configuration(format!(
                "cannot create cache dir {}: {err}",
                config.dir.display()
            ))
        })?;
        Ok(Self {
            dir: config.dir.clone(),
            max_age: config.max_age(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh cached response for `url`, if any.
    pub fn get(&self, url: &str) -> Option<HttpResponse> {
        let path = self.entry_path(url);
        let raw = fs::read_to_string(&path).ok()?;
        let entry: CachedEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "discarding unreadable cache entry");
                return None;
            }
        };
        if entry.url != url {
            return None;
        }
        let age = now_secs().saturating_sub(entry.stored_at_secs);
        if Duration::from_secs(age) >= self.max_age {
            return None;
        }
        debug!(url, age_secs = age, "cache hit");
        Some(HttpResponse {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
        })
    }

    /// Store `response` for `url`. Failures are logged, not returned.
    pub fn put(&self, url: &str, response: &HttpResponse) {
        let entry = CachedEntry {
            url: url.to_string(),
            stored_at_secs: now_secs(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
        };
        let path = self.entry_path(url);
        let written = serde_json::to_string(&entry)
            .map_err(io::Error::from)
            .and_then(|json| fs::write(&path, json));
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "failed to write cache entry");
        }
    }

    /// Remove every cached entry.
    pub fn clear(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", entry_name(url)))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Hex SHA-256 of `url`.
fn entry_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut name = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(name, "{byte:02x}");
    }
    name
}
