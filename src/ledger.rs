//! Bounded per-account operation history

use std::sync::Arc;

use crate::db::Store;
use crate::error::StoreError;
use crate::types::OperationRecord;

/// Records kept per account; older entries are dropped on append
pub const DEFAULT_HISTORY_RETENTION: usize = 100;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Clone)]
pub struct OperationLedger {
    store: Arc<dyn Store>,
    retention: usize,
}

impl OperationLedger {
    pub fn new(store: Arc<dyn Store>, retention: usize) -> Self {
        Self {
            store,
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Prepend `record` and trim the account's list to the retention bound.
    pub async fn append(&self, account: &str, record: &OperationRecord) -> Result<(), StoreError> {
        self.store.push_record(account, record, self.retention).await
    }

    /// One page of history, most recent first. `page` is 1-based; page size is
    /// clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list(
        &self,
        account: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
        if offset >= self.retention {
            return Ok(Vec::new());
        }
        self.store.list_records(account, offset, page_size).await
    }

    /// Retained length, never more than the retention bound.
    pub async fn count(&self, account: &str) -> Result<u64, StoreError> {
        let count = self.store.count_records(account).await?;
        Ok(count.min(self.retention as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::types::{OperationId, OperationKind, RecordStatus};

    fn record(n: u64) -> OperationRecord {
        OperationRecord {
            id: OperationId(format!("op-{}", n)),
            smart_account: "acct".to_string(),
            operation_type: OperationKind::Transfer,
            amount: n,
            nonce: n,
            timestamp: 1_700_000_000 + n as i64,
            signature: "ab".repeat(64),
            status: if n % 2 == 0 {
                RecordStatus::Success
            } else {
                RecordStatus::Failed
            },
            transaction_signature: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let ledger = OperationLedger::new(Arc::new(MemoryStore::new()), DEFAULT_HISTORY_RETENTION);
        for n in 1..=101 {
            ledger.append("acct", &record(n)).await.unwrap();
        }
        assert_eq!(ledger.count("acct").await.unwrap(), 100);

        let first = ledger.list("acct", 1, 10).await.unwrap();
        assert_eq!(first[0].nonce, 101);

        let last = ledger.list("acct", 2, 50).await.unwrap();
        assert_eq!(last.len(), 50);
        // Record 1 was dropped, so the oldest retained is 2
        assert_eq!(last.last().map(|r| r.nonce), Some(2));
    }

    #[tokio::test]
    async fn test_pagination_is_stable() {
        let ledger = OperationLedger::new(Arc::new(MemoryStore::new()), 100);
        for n in 1..=25 {
            ledger.append("acct", &record(n)).await.unwrap();
        }
        let page1: Vec<u64> = ledger
            .list("acct", 1, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.nonce)
            .collect();
        let page3: Vec<u64> = ledger
            .list("acct", 3, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.nonce)
            .collect();
        assert_eq!(page1, (16..=25).rev().collect::<Vec<_>>());
        assert_eq!(page3, (1..=5).rev().collect::<Vec<_>>());
        assert!(ledger.list("acct", 4, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_size_clamped() {
        let ledger = OperationLedger::new(Arc::new(MemoryStore::new()), 100);
        for n in 1..=60 {
            ledger.append("acct", &record(n)).await.unwrap();
        }
        assert_eq!(ledger.list("acct", 1, 500).await.unwrap().len(), MAX_PAGE_SIZE);
        assert_eq!(ledger.list("acct", 0, 0).await.unwrap().len(), 1);
    }
}
