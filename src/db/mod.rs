//! Durable keyed store behind the relayer
//!
//! The lifecycle manager, rate limiter, account cache and ledger all share one
//! [`Store`]. Production uses [`PgStore`]; [`MemoryStore`] backs tests and
//! single-process deployments without a database.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{Operation, OperationId, OperationRecord, OperationStatus, OriginKey, SmartAccount};

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore};

pub type StoreResult<T> = Result<T, StoreError>;

/// Counter state after an increment of a rate window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub resets_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a freshly prepared operation, evicted after `ttl`.
    async fn insert_operation(&self, op: &Operation, ttl: Duration) -> StoreResult<()>;

    /// Load an operation unless it is missing or evicted.
    async fn get_operation(&self, id: &OperationId) -> StoreResult<Option<Operation>>;

    async fn delete_operation(&self, id: &OperationId) -> StoreResult<()>;

    /// Replace the stored operation with `op` only if its current status is
    /// `expected`, resetting its eviction to `ttl`. Returns whether the write
    /// happened. This is the single atomic write per transition.
    async fn transition_operation(
        &self,
        op: &Operation,
        expected: OperationStatus,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn get_cached_account(&self, key: &OriginKey) -> StoreResult<Option<SmartAccount>>;

    async fn cache_account(&self, account: &SmartAccount, ttl: Duration) -> StoreResult<()>;

    async fn invalidate_account(&self, key: &OriginKey) -> StoreResult<()>;

    /// Increment the counter under `key`, starting a new window of length
    /// `window` if none is live.
    async fn increment_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount>;

    /// Prepend `record` to the list for `account` and trim it to `cap` entries.
    async fn push_record(&self, account: &str, record: &OperationRecord, cap: usize)
        -> StoreResult<()>;

    /// Most-recent-first slice of the list for `account`.
    async fn list_records(
        &self,
        account: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<OperationRecord>>;

    async fn count_records(&self, account: &str) -> StoreResult<u64>;

    /// Drop evicted entries. Returns how many were removed.
    async fn sweep_expired(&self) -> StoreResult<u64>;
}

/// `now + ttl`, saturating on absurd durations
pub(crate) fn evict_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or_else(|| now + chrono::Duration::days(36_500))
}
