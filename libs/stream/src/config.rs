use std::time::Duration;

use serde::{Deserialize, Serialize};

use ingest_api::OverflowPolicy;
use tokio::sync::Semaphore;

use crate::StreamError;

fn default_max_inflight_records() -> usize {
    50_000
}

/// Largest window: the tracker's semaphore and the outbound queue (window
/// plus flush and close) must both fit in tokio's permit limit.
pub const MAX_INFLIGHT_RECORDS: usize = Semaphore::MAX_PERMITS - 2;

fn default_flush_timeout_ms() -> u64 {
    60_000
}

/// Settings fixed when a stream is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Upper bound on records submitted but not yet durable.
    #[serde(default = "default_max_inflight_records")]
    pub max_inflight_records: usize,
    /// What `submit` does when the window is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// How long `flush` (and the drain inside `close`) may wait.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_inflight_records: default_max_inflight_records(),
            overflow: OverflowPolicy::default(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn with_max_inflight_records(mut self, max: usize) -> Self {
        self.max_inflight_records = max;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_flush_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.flush_timeout_ms = timeout_ms;
        self
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.max_inflight_records == 0 {
            return Err(StreamError::Config("max_inflight_records must be greater than 0".into()));
        }
        if self.max_inflight_records > MAX_INFLIGHT_RECORDS {
            return Err(StreamError::Config(format!(
                "max_inflight_records must be at most {MAX_INFLIGHT_RECORDS}, got {}",
                self.max_inflight_records
            )));
        }
        if self.flush_timeout_ms == 0 {
            return Err(StreamError::Config("flush_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}
