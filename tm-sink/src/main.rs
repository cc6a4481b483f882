//! `pbench-tool-data-sink` — central Tool Data Sink process.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tm_core::bus::RedisBus;
use tm_core::config::{local_hostname, SinkConfig};
use tm_core::model::ToolGroupStore;
use tm_sink::http::{router, SinkState};
use tm_sink::state::TdsState;
use tm_sink::tracker::Tracker;
use tm_sink::BusWatcher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_sink=info,tm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
        .init();

    let config = SinkConfig::from_env();

    // The orchestrator stages `tools-<group>` before spawning the TDS, so
    // this load never races a TM's own.
    let group = ToolGroupStore::load(&config.benchmark_run_dir, &config.group)?;
    tracing::info!(hosts = group.hostnames().count(), "tool data sink starting up");

    // The TDS always runs on the controller (§6 glossary): the host it
    // runs on is the one whose TM never ships data over HTTP.
    let shared = Arc::new(SinkState {
        tracker: Tracker::from_group(&group, &local_hostname()),
        state: Mutex::new(TdsState::Startup),
        max_upload_bytes: config.max_upload_bytes as usize,
    });

    let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);
    let watcher = BusWatcher::new(config.clone(), bus, group, shared.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let server = tokio::spawn(async move {
        axum::serve(listener, router(shared))
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    watcher.run(shutdown_tx).await?;
    server.await??;

    tracing::info!("tool data sink exiting");
    Ok(())
}
