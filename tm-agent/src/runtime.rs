//! Effect execution: owns every process handle, the bus subscription, and
//! the pending-send map; drives the pure [`transition`] function with
//! messages read off the bus (§4.5, §5 "TM is single-threaded for state
//! handling").

use crate::effect::Effect;
use crate::event::Event;
use crate::state::TmState;
use crate::transition::{transition, TransitionError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tm_core::bus::Bus;
use tm_core::config::AgentConfig;
use tm_core::messages::{parse_action_message, ClientStatusMessage, LivenessMessage, ParticipantKind};
use tm_core::model::ToolGroup;
use tm_core::packaging;
use tm_core::persistent::{Collector, CollectorKind, DcgmCollector, NodeExporterCollector, PersistentCollector};
use tm_core::tool::Tool;

struct PendingSend {
    directory: String,
    tool_data_dir: PathBuf,
}

pub struct AgentRuntime {
    config: AgentConfig,
    bus: Arc<dyn Bus>,
    group: ToolGroup,
    state: TmState,
    transient: HashMap<String, Tool>,
    persistent: Vec<PersistentCollector>,
    pending: Vec<PendingSend>,
    http: reqwest::Client,
    exiting: bool,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, bus: Arc<dyn Bus>, group: ToolGroup) -> Self {
        Self {
            config,
            bus,
            group,
            state: TmState::Startup,
            transient: HashMap::new(),
            persistent: Vec::new(),
            pending: Vec::new(),
            http: reqwest::Client::new(),
            exiting: false,
        }
    }

    fn host_tools(&self) -> BTreeMap<String, String> {
        self.group
            .get_tools(&self.config.hostname)
            .cloned()
            .unwrap_or_default()
    }

    /// Read bus messages and drive the state machine until `terminate`.
    pub async fn run(mut self) -> Result<(), tm_core::error::BusError> {
        let mut subscription = self.bus.subscribe(&self.config.bus.channel).await?;

        self.bus
            .publish(
                &format!("{}-start", self.config.bus.channel),
                &LivenessMessage {
                    kind: ParticipantKind::Tm,
                    hostname: self.config.hostname.clone(),
                    pid: std::process::id() as i32,
                },
            )
            .await?;

        let client_channel = format!("{}-client", self.config.bus.channel);
        loop {
            let msg = subscription.next().await?;
            let raw = msg.payload.to_string();
            let status = self.handle_raw_message(&raw).await;
            self.bus.publish(&client_channel, &status).await?;
            if self.exiting {
                break;
            }
        }
        Ok(())
    }

    async fn handle_raw_message(&mut self, raw: &str) -> ClientStatusMessage {
        let action = match parse_action_message(raw) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed action message");
                return ClientStatusMessage::failure(ParticipantKind::Tm, &self.config.hostname, e.to_string());
            }
        };

        if let Err(e) = action.validate(Some(&self.config.group)) {
            tracing::warn!(error = %e, "rejecting action message");
            return ClientStatusMessage::failure(ParticipantKind::Tm, &self.config.hostname, e.to_string());
        }

        let event = match Event::from_action(&action) {
            Ok(event) => event,
            Err(e) => {
                return ClientStatusMessage::failure(ParticipantKind::Tm, &self.config.hostname, e.to_string());
            }
        };

        match transition(&self.state, event) {
            Ok(result) => {
                self.state = result.new_state;
                let mut failures = 0usize;
                let mut total = 0usize;
                for effect in result.effects {
                    let (f, t) = self.apply_effect(effect).await;
                    failures += f;
                    total += t;
                }
                if failures == 0 {
                    ClientStatusMessage::success(ParticipantKind::Tm, &self.config.hostname)
                } else {
                    ClientStatusMessage::failure(
                        ParticipantKind::Tm,
                        &self.config.hostname,
                        format!("{failures} of {total} tools failed"),
                    )
                }
            }
            Err(TransitionError::IllegalAction { state }) => {
                tracing::warn!(state, "action not legal in current state");
                ClientStatusMessage::failure(
                    ParticipantKind::Tm,
                    &self.config.hostname,
                    format!("action not legal in state '{state}'"),
                )
            }
        }
    }

    /// Returns `(failure_count, attempted_count)`.
    async fn apply_effect(&mut self, effect: Effect) -> (usize, usize) {
        match effect {
            Effect::StartPersistentCollectors => self.start_persistent_collectors().await,
            Effect::StartTransientTools { directory } => self.start_transient_tools(&directory).await,
            Effect::StopTransientTools { directory } => self.stop_transient_tools(&directory).await,
            Effect::Send => self.send_pending().await,
            Effect::RunSysinfo { args } => self.run_sysinfo(&args).await,
            Effect::StopPersistentCollectors => self.stop_persistent_collectors().await,
            Effect::Exit => {
                self.exiting = true;
                (0, 0)
            }
        }
    }

    async fn start_persistent_collectors(&mut self) -> (usize, usize) {
        let mut failures = 0;
        let mut total = 0;
        for (tool, opts) in self.host_tools() {
            let kind = match CollectorKind::from_tool_metadata(&tool) {
                Some(kind @ (CollectorKind::NodeExporter | CollectorKind::Dcgm)) => kind,
                _ => continue,
            };
            total += 1;
            let mut collector = match kind {
                CollectorKind::NodeExporter => {
                    PersistentCollector::NodeExporter(NodeExporterCollector::new(Some(&opts)))
                }
                CollectorKind::Dcgm => PersistentCollector::Dcgm(DcgmCollector::new(Some(&opts))),
                _ => unreachable!(),
            };
            let (installed, detail) = collector.install().await;
            if !installed {
                tracing::error!(tool, detail, "persistent collector failed to install");
                failures += 1;
                self.persistent.push(collector);
                continue;
            }
            let tool_dir = self.config.benchmark_run_dir.join("tm").join("persistent");
            if let Err(e) = tokio::fs::create_dir_all(&tool_dir).await {
                tracing::error!(error = %e, tool, "failed to create persistent collector directory");
                failures += 1;
                continue;
            }
            collector.start(&tool_dir).await;
            if collector.failed() {
                failures += 1;
            }
            self.persistent.push(collector);
        }
        (failures, total)
    }

    async fn stop_persistent_collectors(&mut self) -> (usize, usize) {
        let total = self.persistent.len();
        let mut failures = 0;
        while let Some(mut collector) = self.persistent.pop() {
            collector.stop().await;
            collector.wait().await;
            if collector.failed() {
                failures += 1;
            }
        }
        (failures, total)
    }

    /// Where this TM stages tool output for `directory`. On the controller
    /// host, `directory` is already a path under the benchmark run
    /// directory, so it's used as-is (§4.5 "Directory handling"). On a
    /// remote host, `directory` is retained purely as an opaque token: the
    /// TM stages under its own private directory under
    /// `remote_tmp_root`, named from `directory`'s MD5 token so repeated
    /// calls for the same action (`start` then `stop`) agree on the path
    /// without the TM having to remember it.
    fn tool_dir_for(&self, directory: &str) -> PathBuf {
        if self.is_local() {
            Path::new(directory).join(&self.config.hostname)
        } else {
            self.config
                .remote_tmp_root
                .join(format!("tm-{}", packaging::directory_token(directory)))
                .join(&self.config.hostname)
        }
    }

    async fn start_transient_tools(&mut self, directory: &str) -> (usize, usize) {
        let tool_dir = self.tool_dir_for(directory);
        if let Err(e) = tokio::fs::create_dir_all(&tool_dir).await {
            tracing::error!(error = %e, directory, "failed to create tool output directory");
            return (1, 1);
        }

        let mut failures = 0;
        let mut total = 0;
        for (name, opts) in self.host_tools() {
            if CollectorKind::from_tool_metadata(&name).is_some() {
                continue;
            }
            total += 1;
            let script = self.config.tools_bin_dir.join(&name);
            let mut tool = Tool::new(name.clone(), opts, script);
            if let Err(e) = tool.start(&tool_dir).await {
                tracing::error!(error = %e, tool = %name, "failed to start tool");
                failures += 1;
                continue;
            }
            self.transient.insert(name, tool);
        }
        (failures, total)
    }

    async fn stop_transient_tools(&mut self, directory: &str) -> (usize, usize) {
        let tool_dir = self.tool_dir_for(directory);
        let mut failures = 0;
        let total = self.transient.len();
        for (name, tool) in self.transient.iter_mut() {
            if let Err(e) = tool.stop(&tool_dir).await {
                tracing::error!(error = %e, tool = %name, "failed to stop tool");
                failures += 1;
            }
        }
        for (name, mut tool) in self.transient.drain().collect::<Vec<_>>() {
            if let Err(e) = tool.wait().await {
                tracing::error!(error = %e, tool = %name, "failed waiting on tool");
                failures += 1;
            }
        }

        self.pending.push(PendingSend {
            directory: directory.to_string(),
            tool_data_dir: tool_dir,
        });
        (failures, total)
    }

    async fn send_pending(&mut self) -> (usize, usize) {
        let pending = std::mem::take(&mut self.pending);
        let mut failures = 0;
        let total = pending.len();
        for entry in pending {
            match self.package_and_send(&entry).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(error = %e, directory = %entry.directory, "send failed");
                    failures += 1;
                    self.pending.push(entry);
                }
            }
        }
        (failures, total)
    }

    /// Whether this TM runs on the same host as the controller (and thus
    /// the TDS). `directory` is already under the benchmark run directory
    /// in that case, so there is nothing to tar or ship (§4.5 "Directory
    /// handling"; §8 scenario 1's "same-host short-circuit").
    fn is_local(&self) -> bool {
        self.config.hostname == self.config.controller
    }

    async fn package_and_send(&self, entry: &PendingSend) -> Result<(), SendError> {
        if self.is_local() {
            return Ok(());
        }

        let hostname = &self.config.hostname;
        for suffix in ["start.out", "start.err", "stop.out", "stop.err"] {
            for name in self.group.list_tools(hostname) {
                let _ = tokio::fs::remove_file(entry.tool_data_dir.join(format!("tm-{name}-{suffix}"))).await;
            }
        }

        let archive_name = format!("{hostname}.tar.xz");
        let archive_path = entry.tool_data_dir.parent().unwrap_or(&entry.tool_data_dir).join(&archive_name);
        packaging::create_tar_xz(
            entry.tool_data_dir.parent().unwrap_or(&entry.tool_data_dir),
            hostname,
            &archive_path,
        )
        .await
        .map_err(SendError::Tar)?;

        let bytes = tokio::fs::read(&archive_path).await.map_err(SendError::Tar)?;
        let md5sum = packaging::md5_hex(&bytes);
        let ctx = packaging::directory_token(&entry.directory);
        let url = format!(
            "http://{}:{}/tool-data/{}/{}",
            self.config.controller, self.config.sink_port, ctx, hostname
        );

        let mut attempts_left = self.config.put_retry_attempts;
        loop {
            let response = self
                .http
                .put(&url)
                .header("filename", &archive_name)
                .header("HTTP_MD5SUM", &md5sum)
                .body(bytes.clone())
                .send()
                .await;
            match response {
                Ok(resp) if resp.status().is_success() => break,
                Ok(resp) => return Err(SendError::Http(resp.status().as_u16())),
                Err(e) if e.is_connect() && attempts_left > 0 => {
                    attempts_left -= 1;
                    tokio::time::sleep(self.config.put_retry_interval).await;
                    continue;
                }
                Err(e) => return Err(SendError::Transport(e.to_string())),
            }
        }

        let _ = tokio::fs::remove_file(&archive_path).await;
        let _ = tokio::fs::remove_dir_all(&entry.tool_data_dir).await;
        Ok(())
    }

    async fn run_sysinfo(&self, args: &[String]) -> (usize, usize) {
        let options = match tm_core::sysinfo::expand_options(args) {
            Ok(options) => options,
            Err(e) => {
                tracing::error!(error = %e, "invalid sysinfo option list");
                return (1, 1);
            }
        };
        let sysinfo_path = self
            .config
            .benchmark_run_dir
            .join("sysinfo")
            .join(&self.config.hostname);
        if let Err(e) = tokio::fs::create_dir_all(&sysinfo_path).await {
            tracing::error!(error = %e, "failed to create sysinfo directory");
            return (1, options.len().max(1));
        }

        let mut failures = 0;
        let total = options.len();
        for option in options {
            if let Err(e) = tm_core::sysinfo::collect(option, &self.config.sysinfo_scripts_dir, &sysinfo_path).await
            {
                tracing::warn!(error = %e, %option, "sysinfo collector failed");
                failures += 1;
            }
        }
        (failures, total)
    }
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("tar packaging failed: {0}")]
    Tar(std::io::Error),
    #[error("sink rejected upload with status {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_core::bus::testing::InMemoryBus;
    use tm_core::config::BusConfig;

    fn config(hostname: &str, controller: &str, run_dir: &Path, remote_tmp_root: &Path) -> AgentConfig {
        AgentConfig {
            bus: BusConfig {
                redis_url: "unused".to_string(),
                channel: "tool-group-default".to_string(),
            },
            benchmark_run_dir: run_dir.to_path_buf(),
            group: "default".to_string(),
            hostname: hostname.to_string(),
            controller: controller.to_string(),
            sink_port: 8080,
            remote_tmp_root: remote_tmp_root.to_path_buf(),
            put_retry_interval: std::time::Duration::from_millis(1),
            put_retry_attempts: 1,
            tools_bin_dir: run_dir.to_path_buf(),
            sysinfo_scripts_dir: run_dir.join("sysinfo"),
            log_forward_channel: None,
        }
    }

    fn runtime(cfg: AgentConfig) -> AgentRuntime {
        let group = ToolGroup {
            name: cfg.group.clone(),
            ..Default::default()
        };
        AgentRuntime::new(cfg, Arc::new(InMemoryBus::new()), group)
    }

    #[test]
    fn tool_dir_for_local_host_uses_directory_directly() {
        let run_dir = tempfile::tempdir().unwrap();
        let tmp_root = tempfile::tempdir().unwrap();
        let rt = runtime(config("host-a", "host-a", run_dir.path(), tmp_root.path()));
        let directory = run_dir.path().join("tools-default-iter1");
        let dir = rt.tool_dir_for(&directory.to_string_lossy());
        assert_eq!(dir, directory.join("host-a"));
    }

    #[test]
    fn tool_dir_for_remote_host_stages_under_remote_tmp_root() {
        let run_dir = tempfile::tempdir().unwrap();
        let tmp_root = tempfile::tempdir().unwrap();
        let rt = runtime(config("host-b", "controller", run_dir.path(), tmp_root.path()));
        let directory = "/run/1".to_string();
        let dir = rt.tool_dir_for(&directory);
        assert!(dir.starts_with(tmp_root.path()));
        assert_eq!(dir.file_name().unwrap(), "host-b");
        assert!(!dir.starts_with(&directory));
    }

    #[test]
    fn tool_dir_for_remote_host_is_stable_across_calls() {
        let run_dir = tempfile::tempdir().unwrap();
        let tmp_root = tempfile::tempdir().unwrap();
        let rt = runtime(config("host-b", "controller", run_dir.path(), tmp_root.path()));
        let directory = "/run/1".to_string();
        assert_eq!(rt.tool_dir_for(&directory), rt.tool_dir_for(&directory));
    }
}
