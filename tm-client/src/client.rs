//! Context-manager-style caller API (§4.8): publish an action to the
//! control bus and wait for every tracked participant — the TDS and each
//! Tool Meister in the group — to report its client-status before
//! returning an aggregate result.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tm_core::bus::Bus;
use tm_core::error::ClientError;
use tm_core::messages::{ActionMessage, ClientStatusMessage, ParticipantKind};
use tm_core::model::ToolGroupStore;

/// Actions a caller is permitted to publish directly. `terminate` has its
/// own dedicated method below, matching the original's split between
/// `tm_allowed_actions` (used by `publish`) and the CLI's wider set.
const ALLOWED_ACTIONS: &[&str] = &["init", "start", "stop", "send", "end", "sysinfo"];

pub struct Client {
    bus: Arc<dyn Bus>,
    channel: String,
    response_timeout: Duration,
}

impl Client {
    pub fn new(bus: Arc<dyn Bus>, channel: impl Into<String>, response_timeout: Duration) -> Self {
        Self {
            bus,
            channel: channel.into(),
            response_timeout,
        }
    }

    /// Publish `action` for `group`, rejecting anything outside the
    /// allowed set, and wait for the aggregate result. Returns 0 on
    /// success, 1 if any tracked responder reported non-success.
    pub async fn publish(
        &self,
        benchmark_run_dir: &Path,
        group: &str,
        directory: Option<&str>,
        action: &str,
        args: Vec<String>,
    ) -> Result<i32, ClientError> {
        if !ALLOWED_ACTIONS.contains(&action) {
            return Err(ClientError::DisallowedAction(action.to_string()));
        }
        self.publish_and_await(benchmark_run_dir, group, directory, action, args).await
    }

    /// Send `terminate` for `group`. `interrupt` is forwarded as an
    /// argument so the Tool Data Sink and every Tool Meister can tell a
    /// clean shutdown apart from one following an interrupted run.
    pub async fn terminate(
        &self,
        benchmark_run_dir: &Path,
        group: &str,
        interrupt: bool,
    ) -> Result<i32, ClientError> {
        self.publish_and_await(
            benchmark_run_dir,
            group,
            None,
            "terminate",
            vec![interrupt.to_string()],
        )
        .await
    }

    async fn publish_and_await(
        &self,
        benchmark_run_dir: &Path,
        group: &str,
        directory: Option<&str>,
        action: &str,
        args: Vec<String>,
    ) -> Result<i32, ClientError> {
        let tool_group = ToolGroupStore::load(benchmark_run_dir, group)?;
        let mut pending_tms: BTreeSet<String> = tool_group.hostnames().map(String::from).collect();
        if pending_tms.is_empty() {
            // No hosts registered, nothing will have been started for this
            // group; nothing to wait on.
            return Ok(0);
        }

        // Subscribe before publishing so a response racing the publish
        // can't be missed.
        let client_channel = format!("{}-client", self.channel);
        let mut subscription = self.bus.subscribe(&client_channel).await?;

        let message = ActionMessage {
            action: action.to_string(),
            group: Some(group.to_string()),
            directory: directory.map(str::to_string),
            args,
        };
        self.bus.publish(&self.channel, &message).await?;

        let mut ds_pending = true;
        let mut all_success = true;
        let deadline = tokio::time::Instant::now() + self.response_timeout;

        while ds_pending || !pending_tms.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout);
            }
            let message = tokio::time::timeout(remaining, subscription.next())
                .await
                .map_err(|_| ClientError::Timeout)??;
            let Ok(status) = serde_json::from_value::<ClientStatusMessage>(message.payload) else {
                continue;
            };
            if !status.is_success() {
                all_success = false;
                tracing::warn!(responder = %status.hostname, status = %status.status, "responder reported a non-success status");
            }
            match status.kind {
                ParticipantKind::Ds => ds_pending = false,
                ParticipantKind::Tm => {
                    pending_tms.remove(&status.hostname);
                }
            }
        }

        Ok(if all_success { 0 } else { 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tm_core::bus::testing::InMemoryBus;
    use tm_core::messages::ParticipantKind;

    fn write_group(run_dir: &Path, group: &str, hosts: &[&str]) {
        let dir = run_dir.join(format!("tools-{group}"));
        std::fs::create_dir_all(&dir).unwrap();
        for host in hosts {
            std::fs::create_dir_all(dir.join(host)).unwrap();
        }
    }

    #[tokio::test]
    async fn publish_rejects_disallowed_action() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let client = Client::new(bus, "tool-group-default", Duration::from_millis(100));
        let run_dir = TempDir::new().unwrap();
        let err = client
            .publish(run_dir.path(), "default", None, "terminate", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DisallowedAction(a) if a == "terminate"));
    }

    #[tokio::test]
    async fn publish_with_no_hosts_succeeds_without_waiting() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let run_dir = TempDir::new().unwrap();
        write_group(run_dir.path(), "default", &[]);
        let client = Client::new(bus, "tool-group-default", Duration::from_millis(100));
        let rc = client
            .publish(run_dir.path(), "default", None, "start", vec![])
            .await
            .unwrap();
        assert_eq!(rc, 0);
    }

    #[tokio::test]
    async fn publish_aggregates_success_from_every_responder() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let run_dir = TempDir::new().unwrap();
        write_group(run_dir.path(), "default", &["host-a", "host-b"]);
        let client = Client::new(bus.clone(), "tool-group-default", Duration::from_secs(2));

        let responders = tokio::spawn({
            let bus = bus.clone();
            async move {
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Ds, "controller"),
                )
                .await
                .unwrap();
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Tm, "host-a"),
                )
                .await
                .unwrap();
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Tm, "host-b"),
                )
                .await
                .unwrap();
            }
        });

        let rc = client
            .publish(run_dir.path(), "default", None, "start", vec![])
            .await
            .unwrap();
        responders.await.unwrap();
        assert_eq!(rc, 0);
    }

    #[tokio::test]
    async fn publish_reports_failure_when_a_responder_fails() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let run_dir = TempDir::new().unwrap();
        write_group(run_dir.path(), "default", &["host-a"]);
        let client = Client::new(bus.clone(), "tool-group-default", Duration::from_secs(2));

        let responders = tokio::spawn({
            let bus = bus.clone();
            async move {
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Ds, "controller"),
                )
                .await
                .unwrap();
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::failure(ParticipantKind::Tm, "host-a", "tool script failed"),
                )
                .await
                .unwrap();
            }
        });

        let rc = client
            .publish(run_dir.path(), "default", None, "stop", vec![])
            .await
            .unwrap();
        responders.await.unwrap();
        assert_eq!(rc, 1);
    }

    #[tokio::test]
    async fn terminate_forwards_interrupt_flag_and_waits() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let run_dir = TempDir::new().unwrap();
        write_group(run_dir.path(), "default", &["host-a"]);
        let client = Client::new(bus.clone(), "tool-group-default", Duration::from_secs(2));

        let mut action_sub = bus.subscribe("tool-group-default").await.unwrap();
        let responders = tokio::spawn({
            let bus = bus.clone();
            async move {
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Ds, "controller"),
                )
                .await
                .unwrap();
                bus.publish(
                    "tool-group-default-client",
                    &ClientStatusMessage::success(ParticipantKind::Tm, "host-a"),
                )
                .await
                .unwrap();
            }
        });

        let rc = client.terminate(run_dir.path(), "default", true).await.unwrap();
        let published = action_sub.next().await.unwrap();
        assert_eq!(published.payload["action"], "terminate");
        assert_eq!(published.payload["args"][0], "true");
        responders.await.unwrap();
        assert_eq!(rc, 0);
    }
}
