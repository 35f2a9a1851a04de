//! Operation lifecycle manager
//!
//! `prepare` turns a client intent into a stored operation plus the canonical
//! message to sign. `execute` claims a prepared operation, submits it and
//! records the terminal outcome.
//!
//! State machine: `prepared -> executing -> {executed | failed}`. Every
//! transition is a single conditional store write, so at most one `execute`
//! call per operation gets past the claim.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::account::AccountResolver;
use crate::db::Store;
use crate::error::{ChainError, RelayerError};
use crate::executor::ExecutionAdapter;
use crate::ledger::{OperationLedger, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::message::{check_freshness, MessageBuilder};
use crate::metrics;
use crate::quote::{RouteCheck, RouteChecker};
use crate::rate_limit::{ActionClass, RateLimiter};
use crate::types::{
    Operation, OperationId, OperationParams, OperationRecord, OperationStatus, OperationView,
    OriginKey, OriginSignature, RecordStatus, SmartAccount,
};

/// Default validity window for prepared operations
pub const DEFAULT_SIGNATURE_VALIDITY: Duration = Duration::from_secs(300);

/// Default retention of terminal operations for status queries
pub const DEFAULT_OPERATION_RETENTION: Duration = Duration::from_secs(3600);

/// Failure reason recorded when a submitted transaction was never confirmed
pub const CONFIRMATION_UNKNOWN: &str = "confirmation unknown";

#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub signature_validity: Duration,
    pub operation_retention: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            signature_validity: DEFAULT_SIGNATURE_VALIDITY,
            operation_retention: DEFAULT_OPERATION_RETENTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub actor_key: OriginKey,
    pub params: OperationParams,
    /// Client clock in unix seconds; server time when absent
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub operation_id: OperationId,
    pub canonical_message: String,
    pub expected_nonce: u64,
    /// Unix seconds
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub operation_id: OperationId,
    pub tx_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub records: Vec<OperationRecord>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
}

pub struct OperationManager {
    store: Arc<dyn Store>,
    resolver: AccountResolver,
    rate_limiter: RateLimiter,
    ledger: OperationLedger,
    adapter: ExecutionAdapter,
    route_checker: Arc<dyn RouteChecker>,
    messages: MessageBuilder,
    settings: LifecycleSettings,
}

impl OperationManager {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: AccountResolver,
        rate_limiter: RateLimiter,
        ledger: OperationLedger,
        adapter: ExecutionAdapter,
        route_checker: Arc<dyn RouteChecker>,
        settings: LifecycleSettings,
    ) -> Self {
        let messages = MessageBuilder::new(*resolver.program_id());
        Self {
            store,
            resolver,
            rate_limiter,
            ledger,
            adapter,
            route_checker,
            messages,
            settings,
        }
    }

    pub fn resolver(&self) -> &AccountResolver {
        &self.resolver
    }

    // ========================================================================
    // Prepare
    // ========================================================================

    pub async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse, RelayerError> {
        let PrepareRequest {
            actor_key,
            params,
            timestamp,
        } = request;
        let kind = params.kind();

        params.validate()?;
        let params = self.check_swap_route(params).await?;

        let expected_nonce = match &params {
            OperationParams::CreateAccount(_) => {
                if self.resolver.resolve_fresh(&actor_key).await?.is_some() {
                    return Err(RelayerError::conflict("Smart account already exists"));
                }
                0
            }
            _ => {
                let account = self
                    .resolver
                    .resolve_fresh(&actor_key)
                    .await?
                    .ok_or_else(|| RelayerError::not_found("Smart account not found"))?;
                account.nonce.checked_add(1).ok_or_else(|| {
                    RelayerError::conflict("Smart account nonce is exhausted")
                })?
            }
        };

        let subject = actor_key.to_hex();
        self.rate_limiter
            .check(&subject, ActionClass::Prepare)
            .await?;
        if matches!(params, OperationParams::CreateAccount(_)) {
            self.rate_limiter.check(&subject, ActionClass::Create).await?;
        }

        let now = Utc::now();
        let window_secs = self.settings.signature_validity.as_secs() as i64;
        let timestamp = match timestamp {
            Some(ts) => {
                check_freshness(ts, now.timestamp(), window_secs)?;
                ts
            }
            None => now.timestamp(),
        };
        let expires_at_secs = timestamp + window_secs;
        let expires_at = DateTime::<Utc>::from_timestamp(expires_at_secs, 0)
            .ok_or_else(|| RelayerError::client("Timestamp out of range"))?;

        let canonical_message =
            self.messages
                .build(&params, expected_nonce, timestamp, expires_at_secs)?;

        let op = Operation {
            operation_id: OperationId::generate(),
            actor_key,
            params,
            expected_nonce,
            canonical_message,
            timestamp,
            prepared_at: now,
            expires_at,
            status: OperationStatus::Prepared,
            signature: None,
            result_tx_ref: None,
            failure_reason: None,
        };

        // Evicted when the validity window closes
        self.store
            .insert_operation(&op, remaining(expires_at, now))
            .await?;

        metrics::record_prepared(kind.as_str());
        info!(
            operation_id = %op.operation_id,
            kind = %kind,
            expected_nonce,
            "Operation prepared"
        );

        Ok(PrepareResponse {
            operation_id: op.operation_id,
            canonical_message: op.canonical_message,
            expected_nonce,
            expires_at: expires_at_secs,
        })
    }

    /// Reject infeasible swaps and pin the minimum output into the params
    /// so it is covered by the signature.
    async fn check_swap_route(
        &self,
        params: OperationParams,
    ) -> Result<OperationParams, RelayerError> {
        let mut swap = match params {
            OperationParams::Swap(swap) => swap,
            other => return Ok(other),
        };
        let check = self
            .route_checker
            .check_route(
                &swap.input_mint,
                &swap.output_mint,
                swap.amount,
                swap.slippage_bps,
            )
            .await?;
        match check {
            RouteCheck::Infeasible => Err(RelayerError::client(
                "No swap route available for the requested pair and amount",
            )),
            RouteCheck::Feasible { minimum_out, .. } => {
                if swap.minimum_amount_out.is_none() {
                    swap.minimum_amount_out = Some(minimum_out);
                }
                Ok(OperationParams::Swap(swap))
            }
        }
    }

    // ========================================================================
    // Execute
    // ========================================================================

    pub async fn execute(
        &self,
        operation_id: &OperationId,
        signature_hex: &str,
    ) -> Result<ExecuteResponse, RelayerError> {
        let signature = OriginSignature::from_hex(signature_hex)?;

        let op = self
            .store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| RelayerError::not_found("Operation not found or expired"))?;

        if op.status != OperationStatus::Prepared {
            return Err(RelayerError::conflict(format!(
                "Operation is {}, expected prepared",
                op.status
            )));
        }

        let now = Utc::now();
        if op.is_expired_at(now) {
            self.store.delete_operation(operation_id).await?;
            info!(operation_id = %operation_id, "Evicted expired operation");
            return Err(RelayerError::Expired);
        }

        self.rate_limiter
            .check(&op.actor_key.to_hex(), ActionClass::Execute)
            .await?;

        // Claim: only one caller moves prepared -> executing
        let mut claimed = op.clone();
        claimed.status = OperationStatus::Executing;
        claimed.signature = Some(signature);
        let claim_ttl = remaining(op.expires_at, now) + self.settings.operation_retention;
        if !self
            .store
            .transition_operation(&claimed, OperationStatus::Prepared, claim_ttl)
            .await?
        {
            warn!(operation_id = %operation_id, "Lost race to claim operation");
            return Err(RelayerError::conflict("Operation is already being executed"));
        }

        let started = Instant::now();
        let outcome = self.adapter.execute(&claimed, &signature).await;

        // The account nonce may have moved whatever the outcome
        if let Err(e) = self.resolver.invalidate(&claimed.actor_key).await {
            warn!(error = %e, "Failed to invalidate account cache");
        }

        match outcome {
            Ok(tx_reference) => {
                let mut executed = claimed;
                executed.status = OperationStatus::Executed;
                executed.result_tx_ref = Some(tx_reference.clone());
                self.finish(&executed, started).await.map_err(|e| {
                    RelayerError::infrastructure(format!(
                        "transaction {} submitted but not recorded: {}",
                        tx_reference, e
                    ))
                })?;
                Ok(ExecuteResponse {
                    operation_id: executed.operation_id,
                    tx_reference,
                })
            }
            Err(ChainError::Unavailable(reason)) => {
                // Nothing reached the chain; hand the operation back
                let restored = op;
                let ttl = remaining(restored.expires_at, Utc::now());
                if let Err(e) = self
                    .store
                    .transition_operation(&restored, OperationStatus::Executing, ttl)
                    .await
                {
                    error!(operation_id = %operation_id, error = %e, "Failed to release claim");
                }
                warn!(operation_id = %operation_id, reason = %reason, "Chain unavailable, claim released");
                Err(RelayerError::Infrastructure(reason))
            }
            Err(chain_error) => {
                let mut failed = claimed;
                failed.status = OperationStatus::Failed;
                match &chain_error {
                    ChainError::ConfirmationUnknown { signature } => {
                        failed.failure_reason = Some(CONFIRMATION_UNKNOWN.to_string());
                        failed.result_tx_ref = Some(signature.clone());
                    }
                    other => failed.failure_reason = Some(other.to_string()),
                }
                self.finish(&failed, started).await.map_err(|e| {
                    RelayerError::infrastructure(format!(
                        "{} and failure not recorded: {}",
                        chain_error, e
                    ))
                })?;
                Err(chain_error.into())
            }
        }
    }

    /// Persist the terminal state and append it to the account history.
    /// The history record and metrics are written even when the terminal
    /// write fails; that failure is returned afterwards.
    async fn finish(&self, op: &Operation, started: Instant) -> Result<(), RelayerError> {
        let success = op.status == OperationStatus::Executed;
        let persisted = match self
            .store
            .transition_operation(
                op,
                OperationStatus::Executing,
                self.settings.operation_retention,
            )
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(operation_id = %op.operation_id, "Operation left executing state unexpectedly");
                Err(RelayerError::infrastructure("operation left executing state"))
            }
            Err(e) => {
                error!(operation_id = %op.operation_id, error = %e, "Failed to persist terminal state");
                Err(e.into())
            }
        };

        let smart_account = self.resolver.derive_address(&op.actor_key).0.to_string();
        let record = OperationRecord {
            id: op.operation_id.clone(),
            smart_account: smart_account.clone(),
            operation_type: op.kind(),
            amount: op.params.amount(),
            nonce: op.expected_nonce,
            timestamp: op.timestamp,
            signature: op.signature.map(|s| s.to_hex()).unwrap_or_default(),
            status: if success {
                RecordStatus::Success
            } else {
                RecordStatus::Failed
            },
            transaction_signature: op.result_tx_ref.clone(),
            error_message: op.failure_reason.clone(),
        };
        if let Err(e) = self.ledger.append(&smart_account, &record).await {
            error!(operation_id = %op.operation_id, error = %e, "Failed to append history record");
        }

        metrics::record_executed(op.kind().as_str(), success, started.elapsed().as_secs_f64());
        if success {
            info!(
                operation_id = %op.operation_id,
                kind = %op.kind(),
                tx = op.result_tx_ref.as_deref().unwrap_or_default(),
                "Operation executed"
            );
        } else {
            warn!(
                operation_id = %op.operation_id,
                kind = %op.kind(),
                reason = op.failure_reason.as_deref().unwrap_or_default(),
                "Operation failed"
            );
        }
        persisted
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn status(&self, operation_id: &OperationId) -> Result<OperationView, RelayerError> {
        let op = self
            .store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| RelayerError::not_found("Operation not found"))?;
        Ok(op.view(Utc::now()))
    }

    pub async fn account(&self, key: &OriginKey) -> Result<Option<SmartAccount>, RelayerError> {
        self.resolver.resolve(key).await
    }

    pub async fn history(
        &self,
        key: &OriginKey,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage, RelayerError> {
        let account = self.resolver.derive_address(key).0.to_string();
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let records = self.ledger.list(&account, page, page_size).await?;
        let total = self.ledger.count(&account).await?;
        Ok(HistoryPage {
            records,
            total,
            page,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }
}

/// Time left until `deadline`, never less than one second
fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now)
        .to_std()
        .unwrap_or_default()
        .max(Duration::from_secs(1))
}
