//! Start sequence (§4.7 points 1-7): bus readiness, TDS bring-up, TM
//! bring-up (local + remote), liveness confirmation, PID table persistence.

use crate::error::OrchestratorError;
use crate::remote_shell::RemoteShell;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tm_core::bus::Bus;
use tm_core::config::{local_hostname, OrchestratorConfig};
use tm_core::messages::{LivenessMessage, ParticipantKind, PidEntry, PidTable, TdsParams, TmParams};
use tm_core::model::ToolGroupStore;
use tokio::process::{Child, Command};

const BUS_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the stop sequence needs: the PID table the TDS itself
/// consults, plus the locally-spawned child handles the orchestrator
/// supervises directly (remote TMs are tracked by PID only).
pub struct RunHandle {
    pub pids: PidTable,
    pub local_tds: Option<Child>,
    pub local_tms: Vec<Child>,
}

pub async fn start(
    config: &OrchestratorConfig,
    bus: Arc<dyn Bus>,
    remote: Arc<dyn RemoteShell>,
) -> Result<RunHandle, OrchestratorError> {
    let group = ToolGroupStore::load(&config.benchmark_run_dir, &config.group)?;
    let hosts: BTreeSet<&str> = group.hostnames().collect();
    if hosts.is_empty() {
        return Err(OrchestratorError::EmptyToolGroup(config.group.clone()));
    }

    let tm_dir = config.benchmark_run_dir.join("tm");
    tokio::fs::create_dir_all(&tm_dir).await?;
    tokio::fs::write(tm_dir.join(".uuid"), uuid::Uuid::new_v4().to_string()).await?;

    let liveness_channel = format!("{}-start", config.bus.channel);
    let mut liveness = tokio::time::timeout(BUS_READY_TIMEOUT, bus.subscribe(&liveness_channel))
        .await
        .map_err(|_| OrchestratorError::BusTimeout)??;

    let tds_params = TdsParams {
        benchmark_run_dir: config.benchmark_run_dir.to_string_lossy().to_string(),
        channel: config.bus.channel.clone(),
        controller: config.controller.clone(),
        group: config.group.clone(),
        bind_addr: "0.0.0.0".to_string(),
        port: 8080,
    };
    bus.set(&format!("tds-{}", config.group), &tds_params).await?;

    let local_tds = spawn_local_tds(config, &tm_dir).await?;
    tracing::info!(pid = local_tds.id(), "tool data sink spawned");

    let ds_pid = await_liveness(&mut liveness, ParticipantKind::Ds, None, BUS_READY_TIMEOUT)
        .await
        .map_err(|_| OrchestratorError::SinkTimeout)?;

    let controller_host = local_hostname();
    let mut local_tms = Vec::new();
    let mut tm_pids = Vec::new();
    let mut expected: BTreeSet<String> = BTreeSet::new();

    for host in hosts.iter().copied() {
        expected.insert(host.to_string());
        let tools: BTreeMap<String, String> = group
            .get_tools(host)
            .cloned()
            .unwrap_or_default();
        let tm_params = TmParams {
            benchmark_run_dir: config.benchmark_run_dir.to_string_lossy().to_string(),
            channel: config.bus.channel.clone(),
            controller: config.controller.clone(),
            group: config.group.clone(),
            hostname: host.to_string(),
            tools,
        };
        bus.set(&format!("tm-{}-{}", config.group, host), &tm_params).await?;

        let env = tm_env(config, host);
        if host == controller_host {
            let child = spawn_local_tm(&env, &tm_dir, host).await?;
            let pid = child.id().unwrap_or_default() as i32;
            local_tms.push(child);
            tm_pids.push(PidEntry {
                kind: ParticipantKind::Tm,
                hostname: host.to_string(),
                pid,
            });
        } else {
            let pid = remote.spawn_tm(host, &env).await?;
            tm_pids.push(PidEntry {
                kind: ParticipantKind::Tm,
                hostname: host.to_string(),
                pid,
            });
        }
    }

    let mut pending = expected.clone();
    let deadline = tokio::time::Instant::now() + BUS_READY_TIMEOUT;
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(OrchestratorError::TmTimeout(pending.into_iter().collect()));
        }
        match tokio::time::timeout(remaining, liveness.next()).await {
            Ok(Ok(msg)) => {
                if let Ok(live) = serde_json::from_value::<LivenessMessage>(msg.payload) {
                    if matches!(live.kind, ParticipantKind::Tm) {
                        pending.remove(&live.hostname);
                    }
                }
            }
            Ok(Err(e)) => return Err(OrchestratorError::Bus(e)),
            Err(_) => return Err(OrchestratorError::TmTimeout(pending.into_iter().collect())),
        }
    }

    let pids = PidTable {
        ds: PidEntry {
            kind: ParticipantKind::Ds,
            hostname: config.controller.clone(),
            pid: ds_pid,
        },
        tm: tm_pids,
    };
    bus.set("tm-pids", &pids).await?;

    Ok(RunHandle {
        pids,
        local_tds: Some(local_tds),
        local_tms,
    })
}

async fn await_liveness(
    subscription: &mut Box<dyn tm_core::bus::Subscription>,
    kind: ParticipantKind,
    hostname: Option<&str>,
    timeout: Duration,
) -> Result<i32, tm_core::error::BusError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(tm_core::error::BusError::Transport("liveness wait timed out".to_string()));
        }
        let msg = tokio::time::timeout(remaining, subscription.next())
            .await
            .map_err(|_| tm_core::error::BusError::Transport("liveness wait timed out".to_string()))??;
        if let Ok(live) = serde_json::from_value::<LivenessMessage>(msg.payload) {
            if live.kind == kind && hostname.map(|h| h == live.hostname).unwrap_or(true) {
                return Ok(live.pid);
            }
        }
    }
}

fn tm_env(config: &OrchestratorConfig, host: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("TM_REDIS_URL".to_string(), config.bus.redis_url.clone());
    env.insert("TM_CHANNEL".to_string(), config.bus.channel.clone());
    env.insert(
        "TM_RUN_DIR".to_string(),
        config.benchmark_run_dir.to_string_lossy().to_string(),
    );
    env.insert("TM_GROUP".to_string(), config.group.clone());
    env.insert("TM_HOSTNAME".to_string(), host.to_string());
    env.insert("TM_CONTROLLER".to_string(), config.controller.clone());
    env
}

async fn spawn_local_tds(config: &OrchestratorConfig, tm_dir: &std::path::Path) -> Result<Child, OrchestratorError> {
    let stdout = std::fs::File::create(tm_dir.join("pbench-tool-data-sink.out"))?;
    let stderr = std::fs::File::create(tm_dir.join("pbench-tool-data-sink.err"))?;
    let child = Command::new("pbench-tool-data-sink")
        .env("TM_REDIS_URL", &config.bus.redis_url)
        .env("TM_CHANNEL", &config.bus.channel)
        .env("TM_RUN_DIR", &config.benchmark_run_dir)
        .env("TM_GROUP", &config.group)
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()?;
    tokio::fs::write(
        tm_dir.join("pbench-tool-data-sink.pid"),
        child.id().unwrap_or_default().to_string(),
    )
    .await?;
    Ok(child)
}

async fn spawn_local_tm(
    env: &BTreeMap<String, String>,
    tm_dir: &std::path::Path,
    host: &str,
) -> Result<Child, OrchestratorError> {
    let stdout = std::fs::File::create(tm_dir.join(format!("tm-{host}.out")))?;
    let stderr = std::fs::File::create(tm_dir.join(format!("tm-{host}.err")))?;
    let mut command = Command::new("pbench-tool-meister");
    command.envs(env.iter());
    let child = command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr)).spawn()?;
    Ok(child)
}
