//! Smart Account Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod account;
pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod quote;
pub mod rate_limit;
pub mod types;
