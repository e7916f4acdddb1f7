//! Runtime configuration for the ingest pipeline.
//!
//! [`IngestConfig`] is plain serde data: it can be loaded from a JSON file,
//! overridden field by field from the command line, and checked with
//! [`IngestConfig::validate`] before any backend is constructed.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON for [`IngestConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File that was requested.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// A TTL or interval was set to zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// Completion markers would expire before fragment records.
    #[error(
        "completion_ttl_secs ({completion}) must exceed fragment_ttl_secs ({fragment}) so late \
         duplicates stay filtered"
    )]
    CompletionTtlTooShort {
        /// Configured marker lifetime.
        completion: u64,
        /// Configured fragment lifetime.
        fragment: u64,
    },
    /// The inbound queue would hold no messages.
    #[error("queue_capacity must be greater than zero")]
    ZeroCapacity,
    /// No bucket name was provided.
    #[error("bucket must not be empty")]
    EmptyBucket,
    /// A key-value URL was given but is blank.
    #[error("kv_url must not be empty when set")]
    EmptyKvUrl,
}

/// Tunables for the ingest worker and its backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Inactivity window for fragment and metadata records.
    pub fragment_ttl_secs: u64,
    /// Lifetime of completion markers.
    pub completion_ttl_secs: u64,
    /// Lifetime of source-to-item session bindings.
    pub session_ttl_secs: u64,
    /// Lifetime of the assembly lock.
    pub lock_ttl_secs: u64,
    /// Delay between garbage-collection sweeps.
    pub gc_interval_secs: u64,
    /// Bucket receiving finished items.
    pub bucket: String,
    /// Subscription filter applied to inbound topics.
    pub topic_filter: String,
    /// Capacity of the inbound message queue.
    pub queue_capacity: usize,
    /// Root directory for the filesystem object store; in-memory when unset.
    pub object_dir: Option<PathBuf>,
    /// SQLite catalog file; in-memory when unset.
    pub catalog_path: Option<PathBuf>,
    /// Redis URL for the shared key-value backend; in-process when unset.
    pub kv_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fragment_ttl_secs: 300,
            completion_ttl_secs: 3600,
            session_ttl_secs: 60,
            lock_ttl_secs: 30,
            gc_interval_secs: 60,
            bucket: "thermo-raw".to_owned(),
            topic_filter: "camera/+/image_json".to_owned(),
            queue_capacity: 1024,
            object_dir: None,
            catalog_path: None,
            kv_url: None,
        }
    }
}

impl IngestConfig {
    /// Load configuration from a JSON file; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] when the file
    /// cannot be used. The result is not validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("fragment_ttl_secs", self.fragment_ttl_secs),
            ("completion_ttl_secs", self.completion_ttl_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("lock_ttl_secs", self.lock_ttl_secs),
            ("gc_interval_secs", self.gc_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if self.completion_ttl_secs <= self.fragment_ttl_secs {
            return Err(ConfigError::CompletionTtlTooShort {
                completion: self.completion_ttl_secs,
                fragment: self.fragment_ttl_secs,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::EmptyBucket);
        }
        if self.kv_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(ConfigError::EmptyKvUrl);
        }
        Ok(())
    }

    /// Fragment and metadata inactivity window.
    #[must_use]
    pub const fn fragment_ttl(&self) -> Duration { Duration::from_secs(self.fragment_ttl_secs) }

    /// Completion marker lifetime.
    #[must_use]
    pub const fn completion_ttl(&self) -> Duration {
        Duration::from_secs(self.completion_ttl_secs)
    }

    /// Session binding lifetime.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration { Duration::from_secs(self.session_ttl_secs) }

    /// Assembly lock lifetime.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration { Duration::from_secs(self.lock_ttl_secs) }

    /// Delay between garbage-collection sweeps.
    #[must_use]
    pub const fn gc_interval(&self) -> Duration { Duration::from_secs(self.gc_interval_secs) }
}
