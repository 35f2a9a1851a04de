//! Smart Account Relayer
//!
//! Lets holders of an origin-chain Ed25519 key operate a smart account on
//! Solana without holding target-chain keys. Clients prepare an operation,
//! sign the returned canonical message with their origin key, and submit the
//! signature; the relayer pays fees and submits the transaction.

use std::sync::Arc;
use std::time::Duration;

use relayer::account::AccountResolver;
use relayer::api::{self, AppState};
use relayer::chain::{keypair_from_base58, SolanaRpcClient};
use relayer::config::{Config, LogFormat};
use relayer::db::{self, MemoryStore, PgStore, Store};
use relayer::executor::ExecutionAdapter;
use relayer::ledger::OperationLedger;
use relayer::lifecycle::OperationManager;
use relayer::metrics;
use relayer::quote::HttpRouteChecker;
use relayer::rate_limit::RateLimiter;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sweep interval when running on the in-memory store
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let config = Config::load()?;
    init_logging(config.log_format);

    info!("Starting Smart Account Relayer");
    info!(
        rpc_url = %config.solana.rpc_url,
        program_id = %config.solana.program_id,
        persistent = config.database.is_some(),
        "Configuration loaded"
    );

    let program_id = config.solana.program_id()?;
    let payer = keypair_from_base58(&config.solana.payer_secret_key)?;
    let chain = Arc::new(SolanaRpcClient::new(
        &config.solana.rpc_url,
        payer,
        config.solana.submit_timeout(),
    ));
    if let Err(e) = chain.check_connection().await {
        warn!(error = %e, "Solana RPC not reachable at startup, continuing");
    }

    let (store, store_label, sweep_interval) = match &config.database {
        Some(database) => {
            let pool = db::create_pool(&database.url).await?;
            info!("Database connected");
            db::run_migrations(&pool).await?;
            info!("Database migrations complete");
            (
                Arc::new(PgStore::new(pool)) as Arc<dyn Store>,
                "postgres",
                Duration::from_secs(database.sweep_interval_secs),
            )
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store; state is lost on restart");
            (
                Arc::new(MemoryStore::new()) as Arc<dyn Store>,
                "memory",
                MEMORY_SWEEP_INTERVAL,
            )
        }
    };

    let route_checker = Arc::new(HttpRouteChecker::new(
        &config.quote.api_url,
        Duration::from_secs(config.quote.timeout_secs),
    )?);

    let resolver = AccountResolver::new(
        program_id,
        chain.clone(),
        store.clone(),
        config.lifecycle.account_cache_ttl(),
    );
    let adapter = ExecutionAdapter::new(
        program_id,
        chain.clone(),
        chain,
        config.solana.compute_unit_limit,
    );
    let manager = Arc::new(OperationManager::new(
        store.clone(),
        resolver,
        RateLimiter::new(store.clone(), config.rate_limits.limits()),
        OperationLedger::new(store.clone(), config.lifecycle.history_retention),
        adapter,
        route_checker,
        config.lifecycle.settings(),
    ));

    // Shutdown channels for the sweeper and the API server
    let (sweep_tx, sweep_rx) = mpsc::channel::<()>(1);
    let (api_tx, mut api_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = sweep_tx.send(()).await;
        let _ = api_tx.send(()).await;
    });

    let sweeper = tokio::spawn(run_sweeper(store, store_label, sweep_interval, sweep_rx));

    metrics::UP.set(1.0);
    let result = api::start_server(
        &config.api.bind_address,
        config.api.port,
        AppState::new(manager),
        async move {
            let _ = api_rx.recv().await;
        },
    )
    .await;
    metrics::UP.set(0.0);

    // A failed server never saw the shutdown signal
    if result.is_err() {
        sweeper.abort();
    } else if let Err(e) = sweeper.await {
        error!(error = %e, "Sweeper task panicked");
    }

    info!("Smart Account Relayer stopped");
    result
}

/// Periodically purge expired operations, cache entries and rate windows
async fn run_sweeper(
    store: Arc<dyn Store>,
    label: &'static str,
    interval: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {
                match store.sweep_expired().await {
                    Ok(removed) => {
                        metrics::record_sweep(label, removed);
                        if removed > 0 {
                            info!(removed, "Swept expired entries");
                        }
                    }
                    Err(e) => warn!(error = %e, "Sweep failed"),
                }
            }
        }
    }
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,smart_account_relayer=debug,relayer=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
