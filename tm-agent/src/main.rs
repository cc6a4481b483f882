//! `pbench-tool-meister` — per-host Tool Meister process.

use std::sync::Arc;
use tm_agent::log_forward::BusLogWriter;
use tm_agent::AgentRuntime;
use tm_core::bus::RedisBus;
use tm_core::config::AgentConfig;
use tm_core::model::ToolGroupStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::from_env();

    // TM_LOG_FORWARD_CHANNEL opts into the RedisHandler-equivalent: every
    // log line also goes out over the Control Bus for a central collector.
    let log_forward = config
        .log_forward_channel
        .clone()
        .map(|channel| (BusLogWriter::pair(), channel));
    let forward_layer = log_forward.as_ref().map(|((writer, _), _)| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_ansi(false)
            .with_writer(writer.clone())
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_agent=info,tm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
        .with(forward_layer)
        .init();

    let group = ToolGroupStore::load(&config.benchmark_run_dir, &config.group)?;
    tracing::info!(group = %config.group, hostname = %config.hostname, "tool meister starting up");

    let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);

    if let Some(((_, forwarder), channel)) = log_forward {
        let bus = bus.clone();
        tokio::spawn(forwarder.run(bus, channel));
    }

    let runtime = AgentRuntime::new(config, bus, group);
    runtime.run().await?;

    tracing::info!("tool meister exiting");
    Ok(())
}
