//! `pbench-tool-meister-client GROUP DIRECTORY ACTION [ARGS...]` — publishes
//! one action to the control bus and exits 0/1 on aggregate success/failure.

use std::sync::Arc;
use tm_client::Client;
use tm_core::bus::RedisBus;
use tm_core::config::ClientConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_client=info,tm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
        .init();

    match run().await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error = %e, "failed to publish client action");
            std::process::ExitCode::from(1)
        }
    }
}

async fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let group = args.next().ok_or("missing group argument")?;
    let directory = args.next().ok_or("missing directory argument")?;
    let action = args.next().ok_or("missing action argument")?;
    let rest: Vec<String> = args.collect();

    let config = ClientConfig::from_env();
    let bus = Arc::new(RedisBus::connect(&config.bus.redis_url).await?);
    let client = Client::new(bus, config.bus.channel.clone(), config.response_timeout);

    let directory = if directory.is_empty() { None } else { Some(directory.as_str()) };
    let rc = client
        .publish(&config.benchmark_run_dir, &group, directory, &action, rest)
        .await?;
    Ok(rc)
}
