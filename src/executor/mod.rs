//! Execution adapter
//!
//! Turns an authorized operation into a target-chain transaction: compute
//! budget, Ed25519 verification of the origin signature over the canonical
//! message, then the program instruction for the operation kind.

use std::sync::Arc;

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::account::derive_address;
use crate::chain::{ChainReader, ChainWriter};
use crate::error::ChainError;
use crate::types::{
    Operation, OperationParams, OriginKey, OriginSignature, SwapParams, TransferParams,
    WithdrawParams,
};

pub mod instructions;

/// Default compute unit limit for execution transactions
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 300_000;

/// Authorization material carried by every execution
#[derive(Debug, Clone, Copy)]
pub struct Authorization<'a> {
    pub origin_key: &'a OriginKey,
    pub signature: &'a OriginSignature,
    pub message: &'a [u8],
    pub nonce: u64,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct ExecutionAdapter {
    program_id: Pubkey,
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    compute_unit_limit: u32,
}

impl ExecutionAdapter {
    pub fn new(
        program_id: Pubkey,
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        compute_unit_limit: u32,
    ) -> Self {
        Self {
            program_id,
            reader,
            writer,
            compute_unit_limit,
        }
    }

    /// Dispatch on the operation kind. Returns the transaction signature.
    pub async fn execute(
        &self,
        op: &Operation,
        signature: &OriginSignature,
    ) -> Result<String, ChainError> {
        let auth = Authorization {
            origin_key: &op.actor_key,
            signature,
            message: op.canonical_message.as_bytes(),
            nonce: op.expected_nonce,
            timestamp: op.timestamp,
        };
        match &op.params {
            OperationParams::Transfer(params) => self.execute_transfer(&auth, params).await,
            OperationParams::Swap(params) => self.execute_swap(&auth, params).await,
            OperationParams::WithdrawAll(params) => self.execute_withdraw_all(&auth, params).await,
            OperationParams::CreateAccount(_) => self.execute_create_account(&auth).await,
        }
    }

    pub async fn execute_create_account(
        &self,
        auth: &Authorization<'_>,
    ) -> Result<String, ChainError> {
        let (smart_account, bump) = derive_address(&self.program_id, auth.origin_key);
        if self.reader.get_account_info(&smart_account).await?.is_some() {
            warn!(smart_account = %smart_account, "Create requested for existing account");
            return Err(ChainError::AlreadyExists);
        }

        let ix = instructions::create_account(
            &self.program_id,
            &smart_account,
            &self.writer.payer(),
            auth.origin_key.as_bytes(),
            bump,
        );
        let signature = self.submit(auth, ix).await?;
        info!(smart_account = %smart_account, tx = %signature, "Smart account created");
        Ok(signature)
    }

    pub async fn execute_transfer(
        &self,
        auth: &Authorization<'_>,
        params: &TransferParams,
    ) -> Result<String, ChainError> {
        let (smart_account, _) = derive_address(&self.program_id, auth.origin_key);
        let destination = parse_pubkey(&params.destination, "destination")?;
        let (source, destination) = match &params.token_mint {
            Some(mint) => {
                let mint = parse_pubkey(mint, "token mint")?;
                (
                    instructions::associated_token_address(&smart_account, &mint),
                    instructions::associated_token_address(&destination, &mint),
                )
            }
            None => (smart_account, destination),
        };

        let ix = instructions::transfer(
            &self.program_id,
            &smart_account,
            &source,
            &destination,
            params.amount,
            auth.nonce,
            auth.timestamp,
            auth.signature.as_bytes(),
        );
        let signature = self.submit(auth, ix).await?;
        info!(
            smart_account = %smart_account,
            amount = params.amount,
            nonce = auth.nonce,
            tx = %signature,
            "Transfer executed"
        );
        Ok(signature)
    }

    pub async fn execute_swap(
        &self,
        auth: &Authorization<'_>,
        params: &SwapParams,
    ) -> Result<String, ChainError> {
        let (smart_account, _) = derive_address(&self.program_id, auth.origin_key);
        let ix = instructions::swap(
            &self.program_id,
            &smart_account,
            params.amount,
            params.minimum_amount_out.unwrap_or(0),
            auth.nonce,
            auth.timestamp,
            auth.signature.as_bytes(),
        );
        let signature = self.submit(auth, ix).await?;
        info!(
            smart_account = %smart_account,
            amount_in = params.amount,
            nonce = auth.nonce,
            tx = %signature,
            "Swap executed"
        );
        Ok(signature)
    }

    pub async fn execute_withdraw_all(
        &self,
        auth: &Authorization<'_>,
        params: &WithdrawParams,
    ) -> Result<String, ChainError> {
        let (smart_account, _) = derive_address(&self.program_id, auth.origin_key);
        let destination = parse_pubkey(&params.destination, "destination")?;
        let (token_account, destination) = match &params.token_mint {
            Some(mint) => {
                let mint = parse_pubkey(mint, "token mint")?;
                (
                    instructions::associated_token_address(&smart_account, &mint),
                    instructions::associated_token_address(&destination, &mint),
                )
            }
            None => (smart_account, destination),
        };

        let ix = instructions::withdraw_all(
            &self.program_id,
            &smart_account,
            &token_account,
            &destination,
            auth.nonce,
            auth.timestamp,
            auth.signature.as_bytes(),
        );
        let signature = self.submit(auth, ix).await?;
        info!(smart_account = %smart_account, nonce = auth.nonce, tx = %signature, "Withdraw-all executed");
        Ok(signature)
    }

    /// Bundle the program instruction behind budget and verification instructions.
    fn build_transaction(
        &self,
        auth: &Authorization<'_>,
        program_ix: Instruction,
    ) -> Result<Vec<Instruction>, ChainError> {
        Ok(vec![
            instructions::compute_unit_limit(self.compute_unit_limit),
            instructions::ed25519_verify(
                auth.origin_key.as_bytes(),
                auth.signature.as_bytes(),
                auth.message,
            )?,
            program_ix,
        ])
    }

    async fn submit(
        &self,
        auth: &Authorization<'_>,
        program_ix: Instruction,
    ) -> Result<String, ChainError> {
        let instructions = self.build_transaction(auth, program_ix)?;
        self.writer.submit_transaction(&instructions).await
    }
}

fn parse_pubkey(value: &str, field: &str) -> Result<Pubkey, ChainError> {
    value
        .parse()
        .map_err(|_| ChainError::Rejected(format!("invalid {} address: {}", field, value)))
}
