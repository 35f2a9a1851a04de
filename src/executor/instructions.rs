//! Instruction builders for the smart account program
//!
//! Every execution transaction is laid out as
//! `[compute budget, ed25519 verify, program instruction]`. The program
//! locates the verify instruction through the instructions sysvar.

use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::{ed25519_program, pubkey, system_program, sysvar};

use crate::error::ChainError;

pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Program instruction tags
pub mod tag {
    pub const CREATE_ACCOUNT: u8 = 0;
    pub const TRANSFER: u8 = 1;
    pub const SWAP: u8 = 2;
    pub const WITHDRAW_ALL: u8 = 3;
}

// Ed25519 precompile layout: 2-byte header, one 14-byte offsets record,
// then public key, signature and message
const ED25519_OFFSETS_START: usize = 2;
const ED25519_PUBKEY_OFFSET: usize = 16;
const ED25519_SIGNATURE_OFFSET: usize = ED25519_PUBKEY_OFFSET + 32;
const ED25519_MESSAGE_OFFSET: usize = ED25519_SIGNATURE_OFFSET + 64;
/// Offsets refer to this instruction's own data
const CURRENT_INSTRUCTION: u16 = u16::MAX;

/// Signature-verification instruction for the Ed25519 precompile.
pub fn ed25519_verify(
    pubkey: &[u8; 32],
    signature: &[u8; 64],
    message: &[u8],
) -> Result<Instruction, ChainError> {
    let message_len = u16::try_from(message.len()).map_err(|_| {
        ChainError::Rejected(format!("message too long to verify: {} bytes", message.len()))
    })?;

    let mut data = Vec::with_capacity(ED25519_MESSAGE_OFFSET + message.len());
    data.push(1); // signature count
    data.push(0); // padding
    for field in [
        ED25519_SIGNATURE_OFFSET as u16,
        CURRENT_INSTRUCTION,
        ED25519_PUBKEY_OFFSET as u16,
        CURRENT_INSTRUCTION,
        ED25519_MESSAGE_OFFSET as u16,
        message_len,
        CURRENT_INSTRUCTION,
    ] {
        data.extend_from_slice(&field.to_le_bytes());
    }
    debug_assert_eq!(data.len(), ED25519_OFFSETS_START + 14);
    data.extend_from_slice(pubkey);
    data.extend_from_slice(signature);
    data.extend_from_slice(message);

    Ok(Instruction {
        program_id: ed25519_program::id(),
        accounts: vec![],
        data,
    })
}

pub fn compute_unit_limit(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

/// Associated token account of `owner` for `mint`
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

/// Nonce, timestamp and signature trailer shared by all authorized instructions
fn push_authorization(data: &mut Vec<u8>, nonce: u64, timestamp: i64, signature: &[u8; 64]) {
    data.extend_from_slice(&nonce.to_le_bytes());
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(signature);
}

pub fn create_account(
    program_id: &Pubkey,
    smart_account: &Pubkey,
    payer: &Pubkey,
    origin_pubkey: &[u8; 32],
    bump: u8,
) -> Instruction {
    let mut data = Vec::with_capacity(1 + 32 + 1);
    data.push(tag::CREATE_ACCOUNT);
    data.extend_from_slice(origin_pubkey);
    data.push(bump);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*smart_account, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data,
    }
}

/// Token movement out of the smart account. `source` and `destination` are
/// the token accounts the program debits and credits.
#[allow(clippy::too_many_arguments)]
pub fn transfer(
    program_id: &Pubkey,
    smart_account: &Pubkey,
    source: &Pubkey,
    destination: &Pubkey,
    amount: u64,
    nonce: u64,
    timestamp: i64,
    signature: &[u8; 64],
) -> Instruction {
    let mut data = Vec::with_capacity(1 + 8 + 8 + 8 + 64);
    data.push(tag::TRANSFER);
    data.extend_from_slice(&amount.to_le_bytes());
    push_authorization(&mut data, nonce, timestamp, signature);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*smart_account, false),
            AccountMeta::new(*source, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(sysvar::instructions::id(), false),
        ],
        data,
    }
}

pub fn swap(
    program_id: &Pubkey,
    smart_account: &Pubkey,
    amount_in: u64,
    minimum_amount_out: u64,
    nonce: u64,
    timestamp: i64,
    signature: &[u8; 64],
) -> Instruction {
    let mut data = Vec::with_capacity(1 + 8 + 8 + 8 + 8 + 64);
    data.push(tag::SWAP);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&minimum_amount_out.to_le_bytes());
    push_authorization(&mut data, nonce, timestamp, signature);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*smart_account, false),
            AccountMeta::new_readonly(sysvar::instructions::id(), false),
        ],
        data,
    }
}

pub fn withdraw_all(
    program_id: &Pubkey,
    smart_account: &Pubkey,
    token_account: &Pubkey,
    destination: &Pubkey,
    nonce: u64,
    timestamp: i64,
    signature: &[u8; 64],
) -> Instruction {
    let mut data = Vec::with_capacity(1 + 8 + 8 + 64);
    data.push(tag::WITHDRAW_ALL);
    push_authorization(&mut data, nonce, timestamp, signature);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*smart_account, false),
            AccountMeta::new(*token_account, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(sysvar::instructions::id(), false),
        ],
        data,
    }
}
