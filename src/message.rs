//! Canonical message construction
//!
//! The canonical message is the exact byte string the origin wallet signs.
//! It is a JSON object with a fixed field order; parameters enter it only as
//! a SHA-256 hash over their key-sorted JSON encoding.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::error::RelayerError;
use crate::types::{OperationKind, OperationParams};

/// Protocol version embedded in every message
pub const MESSAGE_VERSION: u8 = 1;

/// Chain identifier embedded in every message
pub const CHAIN_ID: &str = "solana";

/// Field order here is the wire order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalMessage<'a> {
    version: u8,
    chain: &'a str,
    program: String,
    nonce: u64,
    operation: OperationKind,
    params_hash: String,
    timestamp: i64,
    expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    program_id: Pubkey,
}

impl MessageBuilder {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    /// Build the message for an operation. Timestamps are unix seconds.
    ///
    /// Pure: identical inputs give byte-identical output.
    pub fn build(
        &self,
        params: &OperationParams,
        nonce: u64,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<String, RelayerError> {
        let message = CanonicalMessage {
            version: MESSAGE_VERSION,
            chain: CHAIN_ID,
            program: self.program_id.to_string(),
            nonce,
            operation: params.kind(),
            params_hash: params_hash(&params.payload()),
            timestamp,
            expires_at,
        };
        serde_json::to_string(&message)
            .map_err(|e| RelayerError::infrastructure(format!("message encoding failed: {}", e)))
    }
}

/// Hex SHA-256 of the key-sorted JSON encoding of `params`.
pub fn params_hash(params: &Value) -> String {
    let canonical = canonicalize(params).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Rebuild `value` with every object's keys inserted in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Reject a client timestamp further than `window_secs` from `now`.
pub fn check_freshness(timestamp: i64, now: i64, window_secs: i64) -> Result<(), RelayerError> {
    if now.abs_diff(timestamp) > window_secs.unsigned_abs() {
        return Err(RelayerError::client(format!(
            "Timestamp {} is outside the {}s validity window",
            timestamp, window_secs
        )));
    }
    Ok(())
}
