use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::executor::DEFAULT_COMPUTE_UNIT_LIMIT;
use crate::lifecycle::LifecycleSettings;
use crate::quote::DEFAULT_QUOTE_API_URL;
use crate::rate_limit::{Limit, RateLimits};

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub solana: SolanaConfig,
    /// Absent means the in-memory store
    pub database: Option<DatabaseConfig>,
    pub quote: QuoteConfig,
    pub api: ApiConfig,
    pub lifecycle: LifecycleConfig,
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Target chain configuration
#[derive(Clone, Deserialize)]
pub struct SolanaConfig {
    pub rpc_url: String,
    /// Base58 smart account program id
    pub program_id: String,
    /// Base58 64-byte fee payer keypair
    pub payer_secret_key: String,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
}

/// Custom Debug that redacts the fee payer key.
impl fmt::Debug for SolanaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaConfig")
            .field("rpc_url", &self.rpc_url)
            .field("program_id", &self.program_id)
            .field("payer_secret_key", &"<redacted>")
            .field("submit_timeout_secs", &self.submit_timeout_secs)
            .field("compute_unit_limit", &self.compute_unit_limit)
            .finish()
    }
}

impl SolanaConfig {
    pub fn program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.program_id)
            .map_err(|e| eyre!("PROGRAM_ID is not a valid address: {}", e))
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    #[serde(default = "default_quote_api_url")]
    pub api_url: String,
    #[serde(default = "default_quote_timeout")]
    pub timeout_secs: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Operation lifetimes and retention
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_signature_validity")]
    pub signature_validity_secs: u64,
    #[serde(default = "default_operation_retention")]
    pub operation_retention_secs: u64,
    #[serde(default = "default_account_cache_ttl")]
    pub account_cache_ttl_secs: u64,
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            signature_validity: Duration::from_secs(self.signature_validity_secs),
            operation_retention: Duration::from_secs(self.operation_retention_secs),
        }
    }

    pub fn account_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.account_cache_ttl_secs)
    }
}

/// Per-class request limits, each `(max requests, window seconds)`
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub prepare: (u64, u64),
    pub execute: (u64, u64),
    pub create: (u64, u64),
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let defaults = RateLimits::default();
        let pair = |limit: Limit| (limit.max_requests, limit.window.as_secs());
        Self {
            prepare: pair(defaults.prepare),
            execute: pair(defaults.execute),
            create: pair(defaults.create),
        }
    }
}

impl RateLimitConfig {
    pub fn limits(&self) -> RateLimits {
        RateLimits {
            prepare: Limit::new(self.prepare.0, self.prepare.1),
            execute: Limit::new(self.execute.0, self.execute.1),
            create: Limit::new(self.create.0, self.create.1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

fn default_submit_timeout() -> u64 {
    30
}

fn default_compute_unit_limit() -> u32 {
    DEFAULT_COMPUTE_UNIT_LIMIT
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_quote_api_url() -> String {
    DEFAULT_QUOTE_API_URL.to_string()
}

fn default_quote_timeout() -> u64 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3001
}

fn default_signature_validity() -> u64 {
    300
}

fn default_operation_retention() -> u64 {
    3600
}

fn default_account_cache_ttl() -> u64 {
    60
}

fn default_history_retention() -> usize {
    crate::ledger::DEFAULT_HISTORY_RETENTION
}

/// Optional variable parsed into `T`, falling back to `default` when unset or unparseable
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
            tracing::debug!(path, "Loaded .env file");
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let solana = SolanaConfig {
            rpc_url: env::var("SOLANA_RPC_URL")
                .map_err(|_| eyre!("SOLANA_RPC_URL environment variable is required"))?,
            program_id: env::var("PROGRAM_ID")
                .map_err(|_| eyre!("PROGRAM_ID environment variable is required"))?,
            payer_secret_key: env::var("PAYER_SECRET_KEY")
                .map_err(|_| eyre!("PAYER_SECRET_KEY environment variable is required"))?,
            submit_timeout_secs: env_or("SUBMIT_TIMEOUT_SECS", default_submit_timeout()),
            compute_unit_limit: env_or("COMPUTE_UNIT_LIMIT", default_compute_unit_limit()),
        };

        let database = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| DatabaseConfig {
                url,
                sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", default_sweep_interval()),
            });

        let quote = QuoteConfig {
            api_url: env::var("QUOTE_API_URL").unwrap_or_else(|_| default_quote_api_url()),
            timeout_secs: env_or("QUOTE_TIMEOUT_SECS", default_quote_timeout()),
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| default_bind_address()),
            port: env_or("API_PORT", default_api_port()),
        };

        let lifecycle = LifecycleConfig {
            signature_validity_secs: env_or("SIGNATURE_VALIDITY_SECS", default_signature_validity()),
            operation_retention_secs: env_or(
                "OPERATION_RETENTION_SECS",
                default_operation_retention(),
            ),
            account_cache_ttl_secs: env_or("ACCOUNT_CACHE_TTL_SECS", default_account_cache_ttl()),
            history_retention: env_or("HISTORY_RETENTION", default_history_retention()),
        };

        let defaults = RateLimitConfig::default();
        let rate_limits = RateLimitConfig {
            prepare: (
                env_or("PREPARE_RATE_LIMIT", defaults.prepare.0),
                env_or("PREPARE_RATE_WINDOW_SECS", defaults.prepare.1),
            ),
            execute: (
                env_or("EXECUTE_RATE_LIMIT", defaults.execute.0),
                env_or("EXECUTE_RATE_WINDOW_SECS", defaults.execute.1),
            ),
            create: (
                env_or("CREATE_RATE_LIMIT", defaults.create.0),
                env_or("CREATE_RATE_WINDOW_SECS", defaults.create.1),
            ),
        };

        let config = Config {
            solana,
            database,
            quote,
            api,
            lifecycle,
            rate_limits,
            log_format: env_or("LOG_FORMAT", LogFormat::default()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.solana.rpc_url.is_empty() {
            return Err(eyre!("solana.rpc_url cannot be empty"));
        }

        self.solana.program_id()?;

        // 64-byte keypair, base58 encoded
        let key_len = bs58::decode(&self.solana.payer_secret_key)
            .into_vec()
            .map_err(|_| eyre!("PAYER_SECRET_KEY must be base58"))?
            .len();
        if key_len != 64 {
            return Err(eyre!(
                "PAYER_SECRET_KEY must decode to 64 bytes, got {}",
                key_len
            ));
        }

        if self.solana.submit_timeout_secs == 0 {
            return Err(eyre!("SUBMIT_TIMEOUT_SECS must be greater than zero"));
        }

        if let Some(db) = &self.database {
            if db.sweep_interval_secs == 0 {
                return Err(eyre!("SWEEP_INTERVAL_SECS must be greater than zero"));
            }
        }

        if self.quote.api_url.is_empty() {
            return Err(eyre!("quote.api_url cannot be empty"));
        }

        if self.lifecycle.signature_validity_secs == 0 {
            return Err(eyre!("SIGNATURE_VALIDITY_SECS must be greater than zero"));
        }

        if self.lifecycle.history_retention == 0 {
            return Err(eyre!("HISTORY_RETENTION must be greater than zero"));
        }

        for (name, (max, window)) in [
            ("prepare", self.rate_limits.prepare),
            ("execute", self.rate_limits.execute),
            ("create", self.rate_limits.create),
        ] {
            if max == 0 || window == 0 {
                return Err(eyre!(
                    "{} rate limit and window must be greater than zero",
                    name
                ));
            }
        }

        Ok(())
    }
}
