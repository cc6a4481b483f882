//! Bus-watcher task: the TDS's own action-message consumer, driving
//! `TdsState`, the tracking map, and the run's persistent collectors off
//! the same channel the TMs subscribe to (§4.6 points 1-3, 5-7).

use crate::collectors;
use crate::http::SinkState;
use crate::state::TdsState;
use std::sync::Arc;
use tm_core::bus::Bus;
use tm_core::config::{local_hostname, SinkConfig};
use tm_core::messages::{parse_action_message, ActionMessage, ClientStatusMessage, LivenessMessage, ParticipantKind};
use tm_core::model::ToolGroup;
use tm_core::persistent::PersistentCollector;

pub struct BusWatcher {
    config: SinkConfig,
    bus: Arc<dyn Bus>,
    group: ToolGroup,
    shared: Arc<SinkState>,
    hostname: String,
    collectors: Vec<(String, PersistentCollector)>,
}

impl BusWatcher {
    pub fn new(config: SinkConfig, bus: Arc<dyn Bus>, group: ToolGroup, shared: Arc<SinkState>) -> Self {
        Self {
            config,
            bus,
            group,
            shared,
            hostname: local_hostname(),
            collectors: Vec::new(),
        }
    }

    /// Reads action messages until `terminate`, then fires `shutdown` to
    /// unwind the HTTP server's graceful-shutdown future.
    pub async fn run(mut self, shutdown: tokio::sync::oneshot::Sender<()>) -> Result<(), tm_core::error::BusError> {
        let mut subscription = self.bus.subscribe(&self.config.bus.channel).await?;

        self.bus
            .publish(
                &format!("{}-start", self.config.bus.channel),
                &LivenessMessage {
                    kind: ParticipantKind::Ds,
                    hostname: self.hostname.clone(),
                    pid: std::process::id() as i32,
                },
            )
            .await?;

        let client_channel = format!("{}-client", self.config.bus.channel);
        let mut shutdown = Some(shutdown);
        loop {
            let msg = subscription.next().await?;
            let raw = msg.payload.to_string();
            let (status, exiting) = self.handle_raw_message(&raw).await;
            self.bus.publish(&client_channel, &status).await?;
            if exiting {
                if let Some(tx) = shutdown.take() {
                    let _ = tx.send(());
                }
                break;
            }
        }
        Ok(())
    }

    fn success(&self) -> ClientStatusMessage {
        ClientStatusMessage::success(ParticipantKind::Ds, &self.hostname)
    }

    fn failure(&self, description: impl Into<String>) -> ClientStatusMessage {
        ClientStatusMessage::failure(ParticipantKind::Ds, &self.hostname, description)
    }

    /// Returns `(status, should_exit)`.
    async fn handle_raw_message(&mut self, raw: &str) -> (ClientStatusMessage, bool) {
        let action = match parse_action_message(raw) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed action message");
                return (self.failure(e.to_string()), false);
            }
        };

        if let Err(e) = action.validate(Some(&self.group.name)) {
            tracing::warn!(error = %e, "rejecting action message");
            return (self.failure(e.to_string()), false);
        }

        match action.action.as_str() {
            "init" => (self.handle_init().await, false),
            "start" | "stop" => (self.success(), false),
            "send" => (self.handle_data_move(&action, false).await, false),
            "sysinfo" => (self.handle_data_move(&action, true).await, false),
            "end" => (self.handle_end().await, false),
            "terminate" => (self.success(), true),
            other => (self.failure(format!("unhandled action '{other}'")), false),
        }
    }

    async fn handle_init(&mut self) -> ClientStatusMessage {
        let tm_dir = self.config.benchmark_run_dir.join("tm");
        self.collectors = collectors::build_run_collectors(
            &self.group,
            self.config.benchmark_run_dir.join(format!("tools-{}", self.group.name)),
        );
        let (failures, total) = collectors::start_all(&mut self.collectors, &tm_dir).await;
        *self.shared.state.lock().unwrap() = TdsState::Idle;
        if failures == 0 {
            self.success()
        } else {
            self.failure(format!("{failures} of {total} persistent collectors failed to start"))
        }
    }

    async fn handle_end(&mut self) -> ClientStatusMessage {
        let (failures, total) = collectors::stop_all(&mut self.collectors).await;
        *self.shared.state.lock().unwrap() = TdsState::Idle;
        if failures == 0 {
            self.success()
        } else {
            self.failure(format!("{failures} of {total} persistent collectors failed to stop cleanly"))
        }
    }

    /// `send`/`sysinfo`: flip the tracking map to `waiting`, block until
    /// every tracked TM has posted, then settle back to `Idle` (§4.6 point
    /// 3, §5 "`_wait_for_all_data` for data-moving actions").
    async fn handle_data_move(&mut self, action: &ActionMessage, is_sysinfo: bool) -> ClientStatusMessage {
        let Some(directory) = action.directory.clone() else {
            return self.failure("directory is required for this action".to_string());
        };

        {
            let mut state = self.shared.state.lock().unwrap();
            *state = if is_sysinfo {
                TdsState::Sysinfo { directory: directory.clone() }
            } else {
                TdsState::Send { directory: directory.clone() }
            };
        }

        self.shared.tracker.mark_all_waiting();
        self.shared.tracker.await_all_dormant().await;

        *self.shared.state.lock().unwrap() = TdsState::Idle;
        self.success()
    }
}
