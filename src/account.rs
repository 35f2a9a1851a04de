//! Smart account resolution
//!
//! Maps an origin key to its program-derived address and reads the account's
//! on-chain state. Fresh reads are cached for a short TTL; anything about to
//! depend on the nonce bypasses the cache.

use std::sync::Arc;
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::chain::ChainReader;
use crate::db::Store;
use crate::error::{ChainError, RelayerError};
use crate::types::{OriginKey, SmartAccount};

/// PDA seed prefix shared with the on-chain program
pub const SMART_ACCOUNT_SEED: &[u8] = b"smart_account";

const DISCRIMINATOR_LEN: usize = 8;

/// Account state as laid out by the program, after the 8-byte discriminator
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SmartAccountData {
    pub origin_pubkey: [u8; 32],
    pub nonce: u64,
    pub created_at: i64,
    pub bump: u8,
}

/// Discriminator the program writes ahead of `SmartAccountData`
pub fn account_discriminator() -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(b"account:SmartAccount");
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Deterministic address and bump for `key` under `program_id`.
pub fn derive_address(program_id: &Pubkey, key: &OriginKey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[SMART_ACCOUNT_SEED, key.as_bytes()], program_id)
}

pub fn decode_account_data(data: &[u8]) -> Result<SmartAccountData, ChainError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(ChainError::InvalidAccountData(format!(
            "account data too short: {} bytes",
            data.len()
        )));
    }
    let (discriminator, mut body) = data.split_at(DISCRIMINATOR_LEN);
    if discriminator != account_discriminator().as_slice() {
        return Err(ChainError::InvalidAccountData(
            "unexpected account discriminator".to_string(),
        ));
    }
    SmartAccountData::deserialize(&mut body)
        .map_err(|e| ChainError::InvalidAccountData(e.to_string()))
}

/// Inverse of [`decode_account_data`]
pub fn encode_account_data(data: &SmartAccountData) -> Vec<u8> {
    let mut out = account_discriminator().to_vec();
    // Writing into a Vec cannot fail
    let _ = data.serialize(&mut out);
    out
}

/// Lamport balance of a smart account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: Pubkey,
    pub lamports: u64,
}

#[derive(Clone)]
pub struct AccountResolver {
    program_id: Pubkey,
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn Store>,
    cache_ttl: Duration,
}

impl AccountResolver {
    pub fn new(
        program_id: Pubkey,
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn Store>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            program_id,
            reader,
            store,
            cache_ttl,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn derive_address(&self, key: &OriginKey) -> (Pubkey, u8) {
        derive_address(&self.program_id, key)
    }

    /// Cached read. `None` means the account has not been created yet.
    pub async fn resolve(&self, key: &OriginKey) -> Result<Option<SmartAccount>, RelayerError> {
        if let Some(account) = self.store.get_cached_account(key).await? {
            debug!(origin_key = %key, "Account cache hit");
            return Ok(Some(account));
        }
        self.resolve_fresh(key).await
    }

    /// Chain read that skips the cache and refreshes it.
    pub async fn resolve_fresh(&self, key: &OriginKey) -> Result<Option<SmartAccount>, RelayerError> {
        let (address, _) = self.derive_address(key);
        let Some(raw) = self.reader.get_account_info(&address).await? else {
            return Ok(None);
        };

        let data = decode_account_data(&raw.data)?;
        if data.origin_pubkey != *key.as_bytes() {
            return Err(ChainError::InvalidAccountData(format!(
                "account {} belongs to a different origin key",
                address
            ))
            .into());
        }

        let account = SmartAccount {
            origin_key: *key,
            address,
            nonce: data.nonce,
            created_at: data.created_at,
            bump: data.bump,
        };
        self.store.cache_account(&account, self.cache_ttl).await?;
        Ok(Some(account))
    }

    pub async fn invalidate(&self, key: &OriginKey) -> Result<(), RelayerError> {
        self.store.invalidate_account(key).await?;
        Ok(())
    }

    pub async fn balance(&self, key: &OriginKey) -> Result<AccountBalance, RelayerError> {
        let account = self
            .resolve(key)
            .await?
            .ok_or_else(|| RelayerError::not_found("Smart account not found"))?;
        let lamports = self.reader.get_balance(&account.address).await?;
        Ok(AccountBalance {
            address: account.address,
            lamports,
        })
    }
}
