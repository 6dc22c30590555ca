//! Atomic swap relayer - cross-chain HTLC swap coordinator
//!
//! Hosts the configured chains, watches their escrow events and drives each
//! swap through creation, funding, secret reveal and completion, or through
//! cancellation and refund once a timelock has run out.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use atomic_swap_relayer::api;
use atomic_swap_relayer::chain::ChainManager;
use atomic_swap_relayer::config::{Settings, StoreBackend};
use atomic_swap_relayer::coordination::{OrchestratorConfig, SwapOrchestrator};
use atomic_swap_relayer::events::EventMonitor;
use atomic_swap_relayer::metrics::{self, MetricsServer};
use atomic_swap_relayer::state::{MemorySwapStore, PgSwapStore, SwapStore};

/// Capacity of the monitor-to-orchestrator channel
const NOTIFICATION_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting atomic swap relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Swap store
    let store: Arc<dyn SwapStore> = match settings.database.backend {
        StoreBackend::Postgres => {
            let store = PgSwapStore::new(&settings.database).await?;
            info!("Database connection established");
            store.run_migrations().await?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory swap store; swaps will not survive a restart");
            Arc::new(MemorySwapStore::new())
        }
    };

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Chains
    let chain_manager = Arc::new(ChainManager::from_settings(&settings)?);
    info!(
        "Chains initialized: {:?}",
        chain_manager.connected_chains()
    );

    // Orchestrator, resuming anything left in flight
    let orchestrator = Arc::new(SwapOrchestrator::new(
        OrchestratorConfig::from(&settings),
        chain_manager.clone(),
        store.clone(),
        None,
    )?);
    let restored = orchestrator.restore().await?;
    info!("Swap orchestrator initialized ({} swaps resumed)", restored);

    let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let monitor = Arc::new(EventMonitor::new(
        chain_manager.clone(),
        orchestrator.registry(),
        store.clone(),
        notify_tx,
        Duration::from_millis(settings.relayer.poll_interval_ms),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = api::run_server(config, orchestrator).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start event monitor
    let monitor_handle = tokio::spawn({
        let monitor = monitor.clone();
        async move {
            if let Err(e) = monitor.run().await {
                error!("Event monitor error: {}", e);
            }
        }
    });

    // Start orchestrator
    let orchestrator_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = orchestrator.run(notify_rx).await {
                error!("Swap orchestrator error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                for (chain_id, chain_ok) in chain_manager.health_check().await {
                    if !chain_ok {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Atomic swap relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    monitor.stop().await;
    orchestrator.stop().await;

    // Abort background tasks
    api_handle.abort();
    monitor_handle.abort();
    orchestrator_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Atomic swap relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,atomic_swap_relayer=debug,sqlx=warn,hyper=warn")
    });

    // LOG_FORMAT=json for log shippers
    let json = std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
