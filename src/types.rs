//! Common types for smart-account operations
//!
//! Origin keys and signatures travel as hex on the wire; target-chain
//! addresses travel as base58. Operation parameters are a closed sum type so
//! every place that interprets them has to handle every kind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::RelayerError;

/// Length of an origin-chain Ed25519 public key in bytes
pub const ORIGIN_KEY_LEN: usize = 32;

/// Length of an origin-chain Ed25519 signature in bytes
pub const ORIGIN_SIGNATURE_LEN: usize = 64;

/// Highest accepted swap slippage (50%)
pub const MAX_SLIPPAGE_BPS: u16 = 5_000;

// ============================================================================
// Keys and identifiers
// ============================================================================

/// Origin-chain public key controlling a smart account
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OriginKey(pub [u8; ORIGIN_KEY_LEN]);

impl OriginKey {
    /// Parse a 64-character hex public key. Rejects anything else before any I/O.
    pub fn from_hex(s: &str) -> Result<Self, RelayerError> {
        let bytes = decode_fixed_hex::<ORIGIN_KEY_LEN>(s)
            .ok_or_else(|| RelayerError::client("Invalid origin public key format"))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ORIGIN_KEY_LEN] {
        &self.0
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginKey({})", self.to_hex())
    }
}

impl TryFrom<String> for OriginKey {
    type Error = RelayerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<OriginKey> for String {
    fn from(key: OriginKey) -> Self {
        key.to_hex()
    }
}

/// Ed25519 signature produced by the origin-chain wallet
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OriginSignature(pub [u8; ORIGIN_SIGNATURE_LEN]);

impl OriginSignature {
    /// Parse a 128-character hex signature.
    pub fn from_hex(s: &str) -> Result<Self, RelayerError> {
        let bytes = decode_fixed_hex::<ORIGIN_SIGNATURE_LEN>(s)
            .ok_or_else(|| RelayerError::client("Invalid signature format"))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ORIGIN_SIGNATURE_LEN] {
        &self.0
    }
}

impl fmt::Debug for OriginSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginSignature({})", self.to_hex())
    }
}

impl TryFrom<String> for OriginSignature {
    type Error = RelayerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<OriginSignature> for String {
    fn from(sig: OriginSignature) -> Self {
        sig.to_hex()
    }
}

fn decode_fixed_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}

/// Opaque operation identifier handed to clients by `prepare`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a base58 target-chain address, naming the field on failure.
pub fn parse_address(value: &str, field: &str) -> Result<Pubkey, RelayerError> {
    Pubkey::from_str(value).map_err(|_| RelayerError::client(format!("Invalid {} address", field)))
}

// ============================================================================
// Smart account
// ============================================================================

/// Target-chain account controlled by an origin key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAccount {
    pub origin_key: OriginKey,
    #[serde(with = "base58_pubkey")]
    pub address: Pubkey,
    pub nonce: u64,
    /// Unix seconds, as recorded by the program at creation
    pub created_at: i64,
    pub bump: u8,
}

pub(crate) mod base58_pubkey {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Operation kinds and parameters
// ============================================================================

/// Enumerated operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Transfer,
    Swap,
    WithdrawAll,
    CreateAccount,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "transfer",
            OperationKind::Swap => "swap",
            OperationKind::WithdrawAll => "withdraw_all",
            OperationKind::CreateAccount => "create_account",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(OperationKind::Transfer),
            "swap" => Ok(OperationKind::Swap),
            "withdraw_all" => Ok(OperationKind::WithdrawAll),
            "create_account" => Ok(OperationKind::CreateAccount),
            other => Err(RelayerError::client(format!(
                "Invalid operation type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferParams {
    pub destination: String,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SwapParams {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub slippage_bps: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_amount_out: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WithdrawParams {
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountParams {}

/// Kind-tagged operation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum OperationParams {
    Transfer(TransferParams),
    Swap(SwapParams),
    WithdrawAll(WithdrawParams),
    CreateAccount(CreateAccountParams),
}

impl OperationParams {
    /// Decode the untyped request payload for `kind`.
    ///
    /// A missing payload is only accepted for `create_account`.
    pub fn from_request(kind: OperationKind, params: serde_json::Value) -> Result<Self, RelayerError> {
        let params = match (kind, params) {
            (OperationKind::CreateAccount, serde_json::Value::Null) => {
                serde_json::Value::Object(Default::default())
            }
            (_, serde_json::Value::Null) => {
                return Err(RelayerError::client("Missing required field: params"))
            }
            (_, value) => value,
        };

        let invalid = |e: serde_json::Error| {
            RelayerError::client(format!("Invalid {} parameters: {}", kind, e))
        };

        Ok(match kind {
            OperationKind::Transfer => {
                OperationParams::Transfer(serde_json::from_value(params).map_err(invalid)?)
            }
            OperationKind::Swap => {
                OperationParams::Swap(serde_json::from_value(params).map_err(invalid)?)
            }
            OperationKind::WithdrawAll => {
                OperationParams::WithdrawAll(serde_json::from_value(params).map_err(invalid)?)
            }
            OperationKind::CreateAccount => {
                OperationParams::CreateAccount(serde_json::from_value(params).map_err(invalid)?)
            }
        })
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationParams::Transfer(_) => OperationKind::Transfer,
            OperationParams::Swap(_) => OperationKind::Swap,
            OperationParams::WithdrawAll(_) => OperationKind::WithdrawAll,
            OperationParams::CreateAccount(_) => OperationKind::CreateAccount,
        }
    }

    /// The kind-specific payload without its tag, as hashed into the canonical message.
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            OperationParams::Transfer(p) => serde_json::to_value(p),
            OperationParams::Swap(p) => serde_json::to_value(p),
            OperationParams::WithdrawAll(p) => serde_json::to_value(p),
            OperationParams::CreateAccount(p) => serde_json::to_value(p),
        };
        // Plain structs of strings and integers always serialize
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Amount recorded in the ledger. Withdraw-all is only known on chain.
    pub fn amount(&self) -> u64 {
        match self {
            OperationParams::Transfer(p) => p.amount,
            OperationParams::Swap(p) => p.amount,
            OperationParams::WithdrawAll(_) | OperationParams::CreateAccount(_) => 0,
        }
    }

    /// Stateless validation. Swap route feasibility is checked separately.
    pub fn validate(&self) -> Result<(), RelayerError> {
        match self {
            OperationParams::Transfer(p) => {
                parse_address(&p.destination, "destination")?;
                if p.amount == 0 {
                    return Err(RelayerError::client("Amount must be greater than 0"));
                }
                if let Some(mint) = &p.token_mint {
                    parse_address(mint, "token mint")?;
                }
            }
            OperationParams::Swap(p) => {
                parse_address(&p.input_mint, "input mint")?;
                parse_address(&p.output_mint, "output mint")?;
                if p.input_mint == p.output_mint {
                    return Err(RelayerError::client("Input and output mints must differ"));
                }
                if p.amount == 0 {
                    return Err(RelayerError::client("Amount must be greater than 0"));
                }
                if p.slippage_bps > MAX_SLIPPAGE_BPS {
                    return Err(RelayerError::client(
                        "Slippage must be between 0 and 5000 basis points",
                    ));
                }
            }
            OperationParams::WithdrawAll(p) => {
                parse_address(&p.destination, "destination")?;
                if let Some(mint) = &p.token_mint {
                    parse_address(mint, "token mint")?;
                }
            }
            OperationParams::CreateAccount(_) => {}
        }
        Ok(())
    }
}

// ============================================================================
// Operation state
// ============================================================================

/// Lifecycle status of an operation
///
/// `Expired` is never persisted: it is reported for a still-`Prepared`
/// operation whose validity window has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Prepared,
    Executing,
    Executed,
    Failed,
    Expired,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Prepared => "prepared",
            OperationStatus::Executing => "executing",
            OperationStatus::Executed => "executed",
            OperationStatus::Failed => "failed",
            OperationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Executed | OperationStatus::Failed | OperationStatus::Expired
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepared" => Ok(OperationStatus::Prepared),
            "executing" => Ok(OperationStatus::Executing),
            "executed" => Ok(OperationStatus::Executed),
            "failed" => Ok(OperationStatus::Failed),
            "expired" => Ok(OperationStatus::Expired),
            other => Err(format!("unknown operation status: {}", other)),
        }
    }
}

/// One authorization request in flight or completed
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operation_id: OperationId,
    pub actor_key: OriginKey,
    pub params: OperationParams,
    /// Fixed at preparation time, never recomputed
    pub expected_nonce: u64,
    /// Exact bytes (UTF-8) the origin wallet signs
    pub canonical_message: String,
    /// Unix seconds embedded in the message and passed to the program
    pub timestamp: i64,
    pub prepared_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub signature: Option<OriginSignature>,
    pub result_tx_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        self.params.kind()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Public projection with the actor key removed.
    pub fn view(&self, now: DateTime<Utc>) -> OperationView {
        let status = if self.status == OperationStatus::Prepared && self.is_expired_at(now) {
            OperationStatus::Expired
        } else {
            self.status
        };
        OperationView {
            operation_id: self.operation_id.clone(),
            kind: self.kind(),
            params: self.params.payload(),
            expected_nonce: self.expected_nonce,
            prepared_at: self.prepared_at,
            expires_at: self.expires_at,
            status,
            result_tx_ref: self.result_tx_ref.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Operation as returned by the status query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationView {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub params: serde_json::Value,
    pub expected_nonce: u64,
    pub prepared_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

// ============================================================================
// Ledger records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
}

/// Append-only history entry derived from a terminal operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: OperationId,
    pub smart_account: String,
    pub operation_type: OperationKind,
    pub amount: u64,
    pub nonce: u64,
    /// Unix seconds of the signed message
    pub timestamp: i64,
    pub signature: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
