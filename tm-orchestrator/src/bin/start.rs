//! `pbench-tool-meister-start` — brings up the bus-managed run: the Tool
//! Data Sink and one Tool Meister per host in the tool group.

use std::sync::Arc;
use tm_core::bus::RedisBus;
use tm_core::config::OrchestratorConfig;
use tm_orchestrator::remote_shell::SshShell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_orchestrator=info,tm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
        .init();

    let config = OrchestratorConfig::from_env();
    let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);
    let remote = Arc::new(SshShell::new(&config.ssh_binary));

    match tm_orchestrator::start(&config, bus, remote).await {
        Ok(handle) => {
            tracing::info!(
                ds_pid = handle.pids.ds.pid,
                tm_count = handle.pids.tm.len(),
                "run is up"
            );
            // Locally-spawned children are intentionally left running;
            // `tm-pids` (already persisted by `start`) is the source of
            // truth the stop binary reads back.
            std::mem::drop(handle);
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "bring-up failed");
            Err(Box::new(e))
        }
    }
}
