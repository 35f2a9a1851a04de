use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::StoreError;
use crate::types::{
    Operation, OperationId, OperationParams, OperationStatus, OriginKey,
    OriginSignature, SmartAccount,
};

// Note: Postgres has no unsigned integers. Nonces are stored as BIGINT and
// converted with a checked cast on read; amounts live inside the params JSON.

/// Row of the `operations` table
#[derive(Debug, Clone, FromRow)]
pub struct OperationRow {
    pub id: String,
    pub actor_key: String,
    /// `OperationParams` serialized as `{"kind": .., "params": ..}`
    pub params: String,
    pub expected_nonce: i64,
    pub canonical_message: String,
    pub message_timestamp: i64,
    pub prepared_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub signature: Option<String>,
    pub result_tx_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl OperationRow {
    pub fn from_operation(op: &Operation) -> Result<Self, StoreError> {
        let params = serde_json::to_string(&op.params).map_err(|e| StoreError::Corrupt {
            table: "operations",
            reason: e.to_string(),
        })?;
        Ok(Self {
            id: op.operation_id.0.clone(),
            actor_key: op.actor_key.to_hex(),
            params,
            expected_nonce: to_bigint(op.expected_nonce, "operations")?,
            canonical_message: op.canonical_message.clone(),
            message_timestamp: op.timestamp,
            prepared_at: op.prepared_at,
            expires_at: op.expires_at,
            status: op.status.as_str().to_string(),
            signature: op.signature.map(|s| s.to_hex()),
            result_tx_ref: op.result_tx_ref.clone(),
            failure_reason: op.failure_reason.clone(),
        })
    }

    pub fn into_operation(self) -> Result<Operation, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: "operations",
            reason,
        };
        let params: OperationParams =
            serde_json::from_str(&self.params).map_err(|e| corrupt(e.to_string()))?;
        Ok(Operation {
            operation_id: OperationId(self.id),
            actor_key: OriginKey::from_hex(&self.actor_key).map_err(|e| corrupt(e.to_string()))?,
            params,
            expected_nonce: from_bigint(self.expected_nonce, "operations")?,
            canonical_message: self.canonical_message,
            timestamp: self.message_timestamp,
            prepared_at: self.prepared_at,
            expires_at: self.expires_at,
            status: OperationStatus::from_str(&self.status).map_err(corrupt)?,
            signature: self
                .signature
                .as_deref()
                .map(OriginSignature::from_hex)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))?,
            result_tx_ref: self.result_tx_ref,
            failure_reason: self.failure_reason,
        })
    }
}

/// Row of the `account_cache` table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountCacheRow {
    pub origin_key: String,
    pub address: String,
    pub nonce: i64,
    pub created_at: i64,
    pub bump: i16,
}

impl AccountCacheRow {
    pub fn into_account(self) -> Result<SmartAccount, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: "account_cache",
            reason,
        };
        let address = Pubkey::from_str(&self.address).map_err(|e| corrupt(e.to_string()))?;
        Ok(SmartAccount {
            origin_key: OriginKey::from_hex(&self.origin_key)
                .map_err(|e| corrupt(e.to_string()))?,
            address,
            nonce: from_bigint(self.nonce, "account_cache")?,
            created_at: self.created_at,
            bump: u8::try_from(self.bump).map_err(|e| corrupt(e.to_string()))?,
        })
    }
}

/// Row of the `rate_windows` upsert
#[derive(Debug, Clone, FromRow)]
pub struct RateWindowRow {
    pub count: i64,
    pub window_ends_at: DateTime<Utc>,
}

pub(crate) fn to_bigint(value: u64, table: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("value {} exceeds BIGINT", value),
    })
}

pub(crate) fn from_bigint(value: i64, table: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("negative value {}", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationKind, TransferParams};

    #[test]
    fn test_operation_row_roundtrip() {
        let now = Utc::now();
        let op = Operation {
            operation_id: OperationId("id-1".to_string()),
            actor_key: OriginKey([3; 32]),
            params: OperationParams::Transfer(TransferParams {
                destination: "9WmFfBdBMNQSBGkMxgJK4QKoNJEgkEGjLwGzn3TfDQ5c".to_string(),
                amount: 42,
                token_mint: None,
            }),
            expected_nonce: 7,
            canonical_message: "{\"version\":1}".to_string(),
            timestamp: now.timestamp(),
            prepared_at: now,
            expires_at: now,
            status: OperationStatus::Executed,
            signature: Some(OriginSignature([5; 64])),
            result_tx_ref: Some("sig".to_string()),
            failure_reason: None,
        };
        let row = OperationRow::from_operation(&op).unwrap();
        assert_eq!(row.status, "executed");
        assert!(row.params.contains("\"kind\":\"transfer\""));
        let back = row.into_operation().unwrap();
        assert_eq!(back, op);
        assert_eq!(back.kind(), OperationKind::Transfer);
    }

    #[test]
    fn test_bigint_bounds() {
        assert!(to_bigint(u64::MAX, "t").is_err());
        assert!(from_bigint(-1, "t").is_err());
        assert_eq!(from_bigint(5, "t").unwrap(), 5);
    }

    #[test]
    fn test_account_row_rejects_bad_bump() {
        let row = AccountCacheRow {
            origin_key: "aa".repeat(32),
            address: "9WmFfBdBMNQSBGkMxgJK4QKoNJEgkEGjLwGzn3TfDQ5c".to_string(),
            nonce: 1,
            created_at: 0,
            bump: 300,
        };
        assert!(row.into_account().is_err());
    }
}
