mod config;
mod error;
mod handlers;
mod models;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::Config;
use persistence::candidates::CandidateJournal;
use persistence::{EventLog, JournaledLog, JournaledVoteStore, VoteStore};
use reconciler::Reconciler;
use router::create_router;
use state::AppState;
use tally::{AggregateCounters, BroadcastHub, CandidateRegistry, VotePublisher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vote_types::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=info,tally=info,reconciler=info,persistence=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    tracing::info!(data_dir = %config.data_dir.display(), "Starting vote gateway");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Durable state
    let log = Arc::new(
        JournaledLog::open(config.log_journal(), clock.clone()).context("Failed to open event log")?,
    );
    let store = Arc::new(
        JournaledVoteStore::open(config.store_journal(), clock.clone())
            .context("Failed to open vote store")?,
    );
    let (candidate_journal, candidates) = CandidateJournal::open(config.candidate_journal(), clock.clone())
        .context("Failed to open candidate journal")?;

    let reconciler_config = config.reconciler();
    log.create_group(&reconciler_config.stream, &reconciler_config.group)
        .await
        .context("Failed to create consumer group")?;

    // Live tally, seeded from every accepted vote in the log
    let registry = Arc::new(CandidateRegistry::with_journal(candidate_journal, candidates));
    let counters = Arc::new(AggregateCounters::new());
    let accepted = counters
        .rebuild_from_log(log.as_ref(), &config.stream)
        .await
        .context("Failed to rebuild counters")?;
    let reconciled = store.len().await.context("Failed to read vote store")?;
    tracing::info!(accepted, reconciled, "Tally recovered");

    let hub = BroadcastHub::new(config.hub_capacity);
    let publisher = Arc::new(VotePublisher::new(
        log.clone(),
        counters,
        registry.clone(),
        hub.clone(),
        clock,
        config.publisher(),
    ));

    // Background reconciliation
    let shutdown = CancellationToken::new();
    let reconciler = Reconciler::new(log.clone(), store.clone(), reconciler_config);
    let reconciler_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { reconciler.run(shutdown).await }
    });

    let app = create_router(AppState::new(publisher, registry, hub));
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    tracing::info!("Listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, waiting for reconciler");
    shutdown.cancel();
    if let Err(e) = reconciler_task.await {
        tracing::error!(error = %e, "Reconciler task failed");
    }

    log.sync().context("Failed to sync event log")?;
    store.sync().context("Failed to sync vote store")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
