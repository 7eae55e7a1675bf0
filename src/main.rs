//! Cross-chain tracker service
//!
//! Runs the transfer orchestrator and auction tracker behind the HTTP API,
//! with Prometheus metrics and periodic cleanup of finished work.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use xchain_tracker::api::{self, AppState};
use xchain_tracker::auction::{AuctionTracker, HttpStatusSource};
use xchain_tracker::chain::{BridgeContracts, EthersSubmitter};
use xchain_tracker::config::Settings;
use xchain_tracker::events::{EventBus, TrackerEvent, AUCTION_UPDATE, TRANSFER_UPDATE};
use xchain_tracker::guardian::GuardianClient;
use xchain_tracker::metrics::MetricsServer;
use xchain_tracker::transfer::TransferOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting xchain-tracker v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let bus = Arc::new(EventBus::new());
    subscribe_log_handlers(&bus);

    let guardian = Arc::new(GuardianClient::from_config(&settings.guardian)?);
    info!(
        "Guardian client using {} endpoints",
        guardian.endpoint_count()
    );

    let submitter = Arc::new(EthersSubmitter::new(&settings)?);
    info!("Signing as {:?}", submitter.wallet_address());
    for (chain, healthy) in submitter.health().await {
        if !healthy {
            warn!("Chain {} health check failed", chain);
        }
    }

    let contracts = BridgeContracts::from_settings(&settings)?;
    let orchestrator = Arc::new(TransferOrchestrator::new(
        submitter,
        guardian,
        Arc::clone(&bus),
        contracts,
    ));

    let status_source = Arc::new(HttpStatusSource::from_config(&settings.auction)?);
    let tracker = Arc::new(AuctionTracker::from_config(
        status_source,
        Arc::clone(&bus),
        &settings.auction,
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            transfers: Arc::clone(&orchestrator),
            auctions: Arc::clone(&tracker),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Cleanup loop
    let cleanup_handle = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let tracker = Arc::clone(&tracker);
        let interval = Duration::from_secs(settings.tracker.cleanup_interval_secs.max(1));
        let retention = Duration::from_secs(settings.tracker.finished_retention_secs);
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let transfers = orchestrator.prune_finished(retention);
                let auctions = tracker.prune_finished(retention);
                if transfers + auctions > 0 {
                    info!(
                        "Pruned {} finished transfers and {} finished auctions",
                        transfers, auctions
                    );
                }
            }
        }
    });

    info!(
        "xchain-tracker {} is running",
        settings.tracker.instance_id
    );
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await?;

    info!("Shutdown signal received, stopping...");

    orchestrator.stop_all();
    tracker.stop_all();

    api_handle.abort();
    cleanup_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("xchain-tracker stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xchain_tracker=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Operator-facing log lines for outcomes
fn subscribe_log_handlers(bus: &EventBus) {
    bus.subscribe(TRANSFER_UPDATE, |event| {
        if !event.event.is_terminal() {
            return Ok(());
        }
        if let TrackerEvent::TransferStateChanged {
            key, state, reason, ..
        } = &event.event
        {
            let key = key.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
            match reason {
                Some(reason) => warn!("Transfer {} finished as {}: {}", key, state, reason),
                None => info!("Transfer {} finished as {}", key, state),
            }
        }
        Ok(())
    });

    bus.subscribe(AUCTION_UPDATE, |event| {
        if !event.event.is_terminal() {
            return Ok(());
        }
        if let TrackerEvent::AuctionStateChanged {
            order_hash,
            state,
            resolver,
            reason,
            ..
        } = &event.event
        {
            let resolver = resolver
                .as_ref()
                .map(|r| r.address.as_str())
                .unwrap_or("-");
            match reason {
                Some(reason) => info!(
                    "Order {} finished as {} (resolver {}): {}",
                    order_hash, state, resolver, reason
                ),
                None => info!("Order {} finished as {} (resolver {})", order_hash, state, resolver),
            }
        }
        Ok(())
    });
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => result,
        result = terminate => result,
    }
}
