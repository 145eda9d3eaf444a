//! Sliding window rate limiter backed by the shared key-value store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{KvStore, Script, StoreError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a limiter does when the store cannot give a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Surface the store error; callers treat it as "cannot confirm safety"
    #[default]
    FailClosed,
    /// Log the store error and admit the event
    FailOpen,
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Size of the trailing window
    pub window: Duration,
    /// Maximum number of events admitted per window
    pub rate: u32,
    /// Behaviour on store failure
    pub on_store_error: FailurePolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            rate: 100,
            on_store_error: FailurePolicy::FailClosed,
        }
    }
}

/// Rate limiter errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    /// The store failed and the limiter is configured to fail closed
    #[error("rate limiter store error: {0}")]
    Store(#[from] StoreError),

    /// The script answered with a value outside its contract
    #[error("unexpected rate limiter reply: {0}")]
    UnexpectedReply(i64),
}

/// Admission control: "has this key exceeded its quota?"
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Record an event for `key` and return `true` when it must be rejected
    async fn limit(&self, key: &str) -> Result<bool, LimiterError>;
}

/// Redis-style sliding window limiter
///
/// Pruning, counting and recording run as one script, so concurrent callers
/// cannot overshoot the rate between a read and a write.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn KvStore>,
    config: LimiterConfig,
}

impl SlidingWindowLimiter {
    /// Create a new rate limiter
    pub fn new(store: Arc<dyn KvStore>, config: LimiterConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn limit(&self, key: &str) -> Result<bool, LimiterError> {
        let args = [
            self.config.window.as_millis().to_string(),
            self.config.rate.to_string(),
            Utc::now().timestamp_millis().to_string(),
            Uuid::new_v4().to_string(),
        ];

        let reply = match self
            .store
            .eval(Script::SlidingWindow, &[key.to_string()], &args)
            .await
        {
            Ok(reply) => reply,
            Err(e) => match self.config.on_store_error {
                FailurePolicy::FailClosed => return Err(LimiterError::Store(e)),
                FailurePolicy::FailOpen => {
                    warn!("Rate limiter store failed for {}, admitting: {}", key, e);
                    return Ok(false);
                }
            },
        };

        match reply {
            0 => Ok(false),
            1 => {
                debug!("Rate limit reached for key {}", key);
                Ok(true)
            }
            other => Err(LimiterError::UnexpectedReply(other)),
        }
    }
}
