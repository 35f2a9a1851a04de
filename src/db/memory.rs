//! In-process store
//!
//! Same semantics as the Postgres store, held behind one async mutex so every
//! method is a single atomic step. Eviction is lazy: expired entries are
//! invisible to reads and removed by `sweep_expired`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{evict_at, Store, StoreResult, WindowCount};
use crate::types::{Operation, OperationId, OperationRecord, OperationStatus, OriginKey, SmartAccount};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    evict_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn live(&self, now: DateTime<Utc>) -> bool {
        now < self.evict_at
    }
}

#[derive(Default)]
struct State {
    operations: HashMap<String, Expiring<Operation>>,
    accounts: HashMap<OriginKey, Expiring<SmartAccount>>,
    windows: HashMap<String, Expiring<u64>>,
    records: HashMap<String, VecDeque<OperationRecord>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_operation(&self, op: &Operation, ttl: Duration) -> StoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.operations.insert(
            op.operation_id.0.clone(),
            Expiring {
                value: op.clone(),
                evict_at: evict_at(now, ttl),
            },
        );
        Ok(())
    }

    async fn get_operation(&self, id: &OperationId) -> StoreResult<Option<Operation>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state
            .operations
            .get(id.as_str())
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete_operation(&self, id: &OperationId) -> StoreResult<()> {
        self.state.lock().await.operations.remove(id.as_str());
        Ok(())
    }

    async fn transition_operation(
        &self,
        op: &Operation,
        expected: OperationStatus,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        match state.operations.get_mut(op.operation_id.as_str()) {
            Some(entry) if entry.live(now) && entry.value.status == expected => {
                entry.value = op.clone();
                entry.evict_at = evict_at(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_cached_account(&self, key: &OriginKey) -> StoreResult<Option<SmartAccount>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn cache_account(&self, account: &SmartAccount, ttl: Duration) -> StoreResult<()> {
        let now = Utc::now();
        self.state.lock().await.accounts.insert(
            account.origin_key,
            Expiring {
                value: account.clone(),
                evict_at: evict_at(now, ttl),
            },
        );
        Ok(())
    }

    async fn invalidate_account(&self, key: &OriginKey) -> StoreResult<()> {
        self.state.lock().await.accounts.remove(key);
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let entry = state
            .windows
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.live(now) {
                    entry.value += 1;
                } else {
                    entry.value = 1;
                    entry.evict_at = evict_at(now, window);
                }
            })
            .or_insert_with(|| Expiring {
                value: 1,
                evict_at: evict_at(now, window),
            });
        Ok(WindowCount {
            count: entry.value,
            resets_at: entry.evict_at,
        })
    }

    async fn push_record(
        &self,
        account: &str,
        record: &OperationRecord,
        cap: usize,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let list = state.records.entry(account.to_string()).or_default();
        list.push_front(record.clone());
        list.truncate(cap);
        Ok(())
    }

    async fn list_records(
        &self,
        account: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<OperationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(account)
            .map(|list| list.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn count_records(&self, account: &str) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state.records.get(account).map_or(0, |list| list.len() as u64))
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let before = state.operations.len() + state.accounts.len() + state.windows.len();
        state.operations.retain(|_, entry| entry.live(now));
        state.accounts.retain(|_, entry| entry.live(now));
        state.windows.retain(|_, entry| entry.live(now));
        let after = state.operations.len() + state.accounts.len() + state.windows.len();
        Ok((before - after) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateAccountParams, OperationParams, RecordStatus};
    use solana_sdk::pubkey::Pubkey;

    fn sample_operation(id: &str) -> Operation {
        let now = Utc::now();
        Operation {
            operation_id: OperationId(id.to_string()),
            actor_key: OriginKey([1; 32]),
            params: OperationParams::CreateAccount(CreateAccountParams {}),
            expected_nonce: 0,
            canonical_message: "{}".to_string(),
            timestamp: now.timestamp(),
            prepared_at: now,
            expires_at: now + chrono::Duration::seconds(300),
            status: OperationStatus::Prepared,
            signature: None,
            result_tx_ref: None,
            failure_reason: None,
        }
    }

    fn sample_record(n: u64) -> OperationRecord {
        OperationRecord {
            id: OperationId(format!("op-{}", n)),
            smart_account: "acct".to_string(),
            operation_type: crate::types::OperationKind::Transfer,
            amount: n,
            nonce: n,
            timestamp: n as i64,
            signature: "00".repeat(64),
            status: RecordStatus::Success,
            transaction_signature: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_operation_ttl_eviction() {
        let store = MemoryStore::new();
        let op = sample_operation("a");
        store
            .insert_operation(&op, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.get_operation(&op.operation_id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get_operation(&op.operation_id).await.unwrap().is_none());
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryStore::new();
        let op = sample_operation("b");
        let ttl = Duration::from_secs(60);
        store.insert_operation(&op, ttl).await.unwrap();

        let mut executing = op.clone();
        executing.status = OperationStatus::Executing;
        assert!(store
            .transition_operation(&executing, OperationStatus::Prepared, ttl)
            .await
            .unwrap());
        // Second claim sees Executing and loses
        assert!(!store
            .transition_operation(&executing, OperationStatus::Prepared, ttl)
            .await
            .unwrap());

        let stored = store.get_operation(&op.operation_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Executing);
    }

    #[tokio::test]
    async fn test_transition_of_missing_operation() {
        let store = MemoryStore::new();
        let op = sample_operation("missing");
        assert!(!store
            .transition_operation(&op, OperationStatus::Prepared, Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_window_counter_resets() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(30);
        assert_eq!(store.increment_window("k", window).await.unwrap().count, 1);
        assert_eq!(store.increment_window("k", window).await.unwrap().count, 2);
        assert_eq!(store.increment_window("other", window).await.unwrap().count, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.increment_window("k", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_records_trimmed_newest_first() {
        let store = MemoryStore::new();
        for n in 1..=5 {
            store.push_record("acct", &sample_record(n), 3).await.unwrap();
        }
        assert_eq!(store.count_records("acct").await.unwrap(), 3);
        let page = store.list_records("acct", 0, 10).await.unwrap();
        let nonces: Vec<u64> = page.iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![5, 4, 3]);
        assert!(store.list_records("acct", 3, 10).await.unwrap().is_empty());
        assert_eq!(store.count_records("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_account_cache_invalidate() {
        let store = MemoryStore::new();
        let account = SmartAccount {
            origin_key: OriginKey([9; 32]),
            address: Pubkey::new_unique(),
            nonce: 3,
            created_at: 0,
            bump: 255,
        };
        store
            .cache_account(&account, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get_cached_account(&account.origin_key).await.unwrap(),
            Some(account.clone())
        );
        store.invalidate_account(&account.origin_key).await.unwrap();
        assert!(store
            .get_cached_account(&account.origin_key)
            .await
            .unwrap()
            .is_none());
    }
}
