//! Per-subject fixed-window rate limiting
//!
//! Each (class, subject) pair gets a counter whose window starts on its first
//! request. Up to `max_requests` are allowed per window, so a burst straddling
//! two windows can reach twice the limit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::db::{Store, WindowCount};
use crate::error::{RelayerError, StoreError};
use crate::metrics;

/// Request class with its own counter and limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Prepare,
    Execute,
    Create,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Prepare => "prepare",
            ActionClass::Execute => "execute",
            ActionClass::Create => "create",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max_requests: u64,
    pub window: Duration,
}

impl Limit {
    pub const fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub prepare: Limit,
    pub execute: Limit,
    pub create: Limit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            prepare: Limit::new(10, 60),
            execute: Limit::new(5, 60),
            create: Limit::new(5, 3600),
        }
    }
}

impl RateLimits {
    pub fn for_class(&self, class: ActionClass) -> Limit {
        match class {
            ActionClass::Prepare => self.prepare,
            ActionClass::Execute => self.execute,
            ActionClass::Create => self.create,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Count one request and report whether it fits in the current window.
    pub async fn allow(
        &self,
        subject: &str,
        class: ActionClass,
        max_requests: u64,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let window_count = self.count(subject, class, window).await?;
        Ok(window_count.count <= max_requests)
    }

    /// Apply the configured limit for `class`, mapping a denial to `RateLimited`.
    pub async fn check(&self, subject: &str, class: ActionClass) -> Result<(), RelayerError> {
        let limit = self.limits.for_class(class);
        let window_count = self.count(subject, class, limit.window).await?;
        if window_count.count <= limit.max_requests {
            return Ok(());
        }

        let retry_after_secs = (window_count.resets_at - Utc::now()).num_seconds().max(1) as u64;
        warn!(
            class = %class,
            count = window_count.count,
            max = limit.max_requests,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(class.as_str());
        Err(RelayerError::RateLimited {
            class: class.as_str(),
            retry_after_secs,
        })
    }

    async fn count(
        &self,
        subject: &str,
        class: ActionClass,
        window: Duration,
    ) -> Result<WindowCount, StoreError> {
        self.store
            .increment_window(&window_key(subject, class), window)
            .await
    }
}

fn window_key(subject: &str, class: ActionClass) -> String {
    format!("rate:{}:{}", class, subject)
}
