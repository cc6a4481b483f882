//! `pbench-tool-meister-stop` — publishes `end`/`terminate` and confirms
//! local process exit, reading the PID table the start binary persisted.

use std::sync::Arc;
use tm_core::bus::{Bus, RedisBus};
use tm_core::config::OrchestratorConfig;
use tm_core::messages::PidTable;
use tm_orchestrator::bringup::RunHandle;
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

    let interrupt = std::env::args().any(|a| a == "--interrupt");

    let config = OrchestratorConfig::from_env();
    let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);

    let pids: PidTable = bus
        .get("tm-pids")
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or("no tm-pids entry found on the control bus; is a run up?")?;

    let mut handle = RunHandle {
        pids,
        local_tds: None,
        local_tms: Vec::new(),
    };

    tm_orchestrator::stop(&config, bus, &mut handle, interrupt).await?;
    tracing::info!("run is down");
    Ok(())
}
