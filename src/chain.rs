//! Target-chain client
//!
//! Reads account state and submits signed transactions paid for by the
//! relayer's fee payer. The traits are the seam the lifecycle manager is
//! tested through.

use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result as EyreResult};
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::error::ChainError;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `None` when no account exists at `address`.
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError>;

    /// Lamport balance of `address`.
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainError>;
}

#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Account paying fees and rent for submitted transactions
    fn payer(&self) -> Pubkey;

    /// Sign, send and wait for confirmation. Returns the transaction signature.
    async fn submit_transaction(&self, instructions: &[Instruction]) -> Result<String, ChainError>;
}

/// Decode a base58 secret key into the fee payer keypair.
pub fn keypair_from_base58(secret: &str) -> EyreResult<Keypair> {
    let bytes = bs58::decode(secret.trim())
        .into_vec()
        .map_err(|e| eyre!("Invalid base58 payer secret key: {}", e))?;
    Keypair::from_bytes(&bytes).map_err(|e| eyre!("Invalid payer keypair: {}", e))
}

/// RPC-backed reader and writer
pub struct SolanaRpcClient {
    rpc: RpcClient,
    payer: Keypair,
    submit_timeout: Duration,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: &str, payer: Keypair, submit_timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
            payer,
            submit_timeout,
        }
    }

    /// Startup connectivity check
    pub async fn check_connection(&self) -> EyreResult<()> {
        let version = self
            .rpc
            .get_version()
            .await
            .map_err(|e| eyre!("Failed to reach Solana RPC at {}: {}", self.rpc.url(), e))?;
        info!(
            solana_core = %version.solana_core,
            payer = %self.payer.pubkey(),
            "Connected to Solana RPC"
        );
        Ok(())
    }
}

/// Errors before anything was sent: transport failures are retryable.
fn classify_presend_error(err: ClientError) -> ChainError {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            ChainError::Unavailable(err.to_string())
        }
        _ => ChainError::Rejected(err.to_string()),
    }
}

#[async_trait]
impl ChainReader for SolanaRpcClient {
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| ChainError::Unavailable(format!("account read failed: {}", e)))?;
        Ok(response.value)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainError> {
        self.rpc
            .get_balance(address)
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ChainWriter for SolanaRpcClient {
    fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn submit_transaction(&self, instructions: &[Instruction]) -> Result<String, ChainError> {
        let recent_blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(classify_presend_error)?;

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.payer.pubkey()),
            &[&self.payer],
            recent_blockhash,
        );
        // Known before sending so a lost confirmation can still be reported
        let signature = transaction.signatures[0].to_string();
        debug!(signature = %signature, "Submitting transaction");

        match tokio::time::timeout(
            self.submit_timeout,
            self.rpc.send_and_confirm_transaction(&transaction),
        )
        .await
        {
            Ok(Ok(confirmed)) => Ok(confirmed.to_string()),
            Ok(Err(e)) => match e.kind() {
                // Transport failed mid-flight; the transaction may have landed
                ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
                    warn!(signature = %signature, error = %e, "Transport error while confirming");
                    Err(ChainError::ConfirmationUnknown { signature })
                }
                _ => Err(ChainError::Rejected(e.to_string())),
            },
            Err(_) => {
                warn!(
                    signature = %signature,
                    timeout_secs = self.submit_timeout.as_secs(),
                    "Confirmation timed out"
                );
                Err(ChainError::ConfirmationUnknown { signature })
            }
        }
    }
}
