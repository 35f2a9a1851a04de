//! Shared fixtures: an in-process chain that behaves like the smart account
//! program, a scripted route checker, and a manager wired over `MemoryStore`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relayer::account::{derive_address, encode_account_data, AccountResolver, SmartAccountData};
use relayer::chain::{ChainReader, ChainWriter};
use relayer::db::{MemoryStore, Store, StoreResult, WindowCount};
use relayer::error::{ChainError, RelayerError, StoreError};
use relayer::executor::instructions::tag;
use relayer::executor::{ExecutionAdapter, DEFAULT_COMPUTE_UNIT_LIMIT};
use relayer::ledger::{OperationLedger, DEFAULT_HISTORY_RETENTION};
use relayer::lifecycle::{LifecycleSettings, OperationManager, PrepareRequest};
use relayer::quote::{apply_slippage, RouteCheck, RouteChecker};
use relayer::rate_limit::{RateLimiter, RateLimits};
use relayer::types::{
    Operation, OperationId, OperationParams, OperationRecord, OperationStatus, OriginKey,
    SmartAccount, TransferParams,
};
use solana_sdk::account::Account;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;

pub const CREATED_AT: i64 = 1_700_000_000;

pub fn program_id() -> Pubkey {
    Pubkey::new_from_array([42; 32])
}

pub fn origin_key(seed: u8) -> OriginKey {
    OriginKey([seed; 32])
}

pub fn signature_hex() -> String {
    "ab".repeat(64)
}

pub fn address(seed: u8) -> String {
    Pubkey::new_from_array([seed; 32]).to_string()
}

pub fn transfer(amount: u64) -> OperationParams {
    OperationParams::Transfer(TransferParams {
        destination: address(200),
        amount,
        token_mint: None,
    })
}

pub fn request(key: OriginKey, params: OperationParams) -> PrepareRequest {
    PrepareRequest {
        actor_key: key,
        params,
        timestamp: None,
    }
}

/// In-process stand-in for the chain: keeps program accounts and applies
/// create / nonce-consuming instructions the way the program does.
#[derive(Default)]
pub struct FakeChain {
    accounts: Mutex<HashMap<Pubkey, Account>>,
    submitted: Mutex<Vec<Vec<Instruction>>>,
    failure: Mutex<Option<ChainError>>,
}

impl FakeChain {
    pub fn with_account(self, key: &OriginKey, nonce: u64) -> Self {
        self.put_account(key, nonce);
        self
    }

    pub fn put_account(&self, key: &OriginKey, nonce: u64) {
        let (address, bump) = derive_address(&program_id(), key);
        let data = SmartAccountData {
            origin_pubkey: *key.as_bytes(),
            nonce,
            created_at: CREATED_AT,
            bump,
        };
        self.accounts.lock().unwrap().insert(
            address,
            Account {
                lamports: 2_039_280,
                data: encode_account_data(&data),
                owner: program_id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    /// Store arbitrary bytes at the smart account address of `key`
    pub fn put_raw_account(&self, key: &OriginKey, data: Vec<u8>) {
        let (address, _) = derive_address(&program_id(), key);
        self.accounts.lock().unwrap().insert(
            address,
            Account {
                lamports: 2_039_280,
                data,
                owner: program_id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    /// Make every following submission fail with `error`
    pub fn fail_with(&self, error: ChainError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_submission(&self) -> Option<Vec<Instruction>> {
        self.submitted.lock().unwrap().last().cloned()
    }

    fn apply(&self, ix: &Instruction) -> Result<(), ChainError> {
        let smart_account = ix.accounts[0].pubkey;
        let mut accounts = self.accounts.lock().unwrap();
        let nonce_at = match ix.data[0] {
            tag::CREATE_ACCOUNT => {
                if accounts.contains_key(&smart_account) {
                    return Err(ChainError::Rejected("account already in use".to_string()));
                }
                let mut origin_pubkey = [0u8; 32];
                origin_pubkey.copy_from_slice(&ix.data[1..33]);
                let data = SmartAccountData {
                    origin_pubkey,
                    nonce: 0,
                    created_at: CREATED_AT,
                    bump: ix.data[33],
                };
                accounts.insert(
                    smart_account,
                    Account {
                        lamports: 2_039_280,
                        data: encode_account_data(&data),
                        owner: program_id(),
                        executable: false,
                        rent_epoch: 0,
                    },
                );
                return Ok(());
            }
            tag::TRANSFER => 9,
            tag::SWAP => 17,
            tag::WITHDRAW_ALL => 1,
            other => return Err(ChainError::Rejected(format!("unknown tag {}", other))),
        };

        let account = accounts
            .get_mut(&smart_account)
            .ok_or_else(|| ChainError::Rejected("account not initialized".to_string()))?;
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&ix.data[nonce_at..nonce_at + 8]);
        let nonce = u64::from_le_bytes(nonce);

        let mut state = relayer::account::decode_account_data(&account.data)?;
        if nonce != state.nonce + 1 {
            return Err(ChainError::Rejected("invalid nonce".to_string()));
        }
        state.nonce = nonce;
        account.data = encode_account_data(&state);
        Ok(())
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(address)
            .map(|a| a.lamports)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ChainWriter for FakeChain {
    fn payer(&self) -> Pubkey {
        Pubkey::new_from_array([99; 32])
    }

    async fn submit_transaction(&self, instructions: &[Instruction]) -> Result<String, ChainError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let program_ix = instructions
            .last()
            .ok_or_else(|| ChainError::Rejected("empty transaction".to_string()))?;
        self.apply(program_ix)?;

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(instructions.to_vec());
        Ok(format!("tx-{}", submitted.len()))
    }
}

/// Route checker answering from a fixed script
pub struct ScriptedRoutes {
    feasible: Mutex<bool>,
    out_amount: u64,
}

impl ScriptedRoutes {
    pub fn new(out_amount: u64) -> Self {
        Self {
            feasible: Mutex::new(true),
            out_amount,
        }
    }

    pub fn set_feasible(&self, feasible: bool) {
        *self.feasible.lock().unwrap() = feasible;
    }
}

#[async_trait]
impl RouteChecker for ScriptedRoutes {
    async fn check_route(
        &self,
        _input_mint: &str,
        _output_mint: &str,
        _amount: u64,
        max_slippage_bps: u16,
    ) -> Result<RouteCheck, RelayerError> {
        if !*self.feasible.lock().unwrap() {
            return Ok(RouteCheck::Infeasible);
        }
        Ok(RouteCheck::Feasible {
            out_amount: self.out_amount,
            minimum_out: apply_slippage(self.out_amount, max_slippage_bps),
        })
    }
}

/// `MemoryStore` wrapper that can refuse terminal operation writes
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_terminal: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_terminal: AtomicBool::new(false),
        }
    }

    pub fn fail_terminal_writes(&self) {
        self.fail_terminal.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_operation(&self, op: &Operation, ttl: Duration) -> StoreResult<()> {
        self.inner.insert_operation(op, ttl).await
    }

    async fn get_operation(&self, id: &OperationId) -> StoreResult<Option<Operation>> {
        self.inner.get_operation(id).await
    }

    async fn delete_operation(&self, id: &OperationId) -> StoreResult<()> {
        self.inner.delete_operation(id).await
    }

    async fn transition_operation(
        &self,
        op: &Operation,
        expected: OperationStatus,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let terminal = matches!(
            op.status,
            OperationStatus::Executed | OperationStatus::Failed
        );
        if terminal && self.fail_terminal.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                table: "operations",
                reason: "write refused".to_string(),
            });
        }
        self.inner.transition_operation(op, expected, ttl).await
    }

    async fn get_cached_account(&self, key: &OriginKey) -> StoreResult<Option<SmartAccount>> {
        self.inner.get_cached_account(key).await
    }

    async fn cache_account(&self, account: &SmartAccount, ttl: Duration) -> StoreResult<()> {
        self.inner.cache_account(account, ttl).await
    }

    async fn invalidate_account(&self, key: &OriginKey) -> StoreResult<()> {
        self.inner.invalidate_account(key).await
    }

    async fn increment_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        self.inner.increment_window(key, window).await
    }

    async fn push_record(
        &self,
        account: &str,
        record: &OperationRecord,
        cap: usize,
    ) -> StoreResult<()> {
        self.inner.push_record(account, record, cap).await
    }

    async fn list_records(
        &self,
        account: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<OperationRecord>> {
        self.inner.list_records(account, offset, limit).await
    }

    async fn count_records(&self, account: &str) -> StoreResult<u64> {
        self.inner.count_records(account).await
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        self.inner.sweep_expired().await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub chain: Arc<FakeChain>,
    pub routes: Arc<ScriptedRoutes>,
    pub manager: Arc<OperationManager>,
}

impl Harness {
    pub fn new(chain: FakeChain) -> Self {
        Self::with_limits(chain, RateLimits::default())
    }

    pub fn with_limits(chain: FakeChain, limits: RateLimits) -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let chain = Arc::new(chain);
        let routes = Arc::new(ScriptedRoutes::new(1_000));

        let resolver = AccountResolver::new(
            program_id(),
            chain.clone(),
            faults.clone(),
            Duration::from_secs(60),
        );
        let adapter = ExecutionAdapter::new(
            program_id(),
            chain.clone(),
            chain.clone(),
            DEFAULT_COMPUTE_UNIT_LIMIT,
        );
        let manager = OperationManager::new(
            faults.clone(),
            resolver,
            RateLimiter::new(faults.clone(), limits),
            OperationLedger::new(faults.clone(), DEFAULT_HISTORY_RETENTION),
            adapter,
            routes.clone(),
            LifecycleSettings::default(),
        );

        Self {
            store,
            faults,
            chain,
            routes,
            manager: Arc::new(manager),
        }
    }
}
