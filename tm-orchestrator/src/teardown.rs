//! Stop sequence (§4.7 "Stop sequence", interrupt mode): publish `end`
//! (+ optional `sysinfo`) then `terminate`, poll locally-managed PIDs for
//! exit, join the locally-spawned children.

use crate::bringup::RunHandle;
use crate::error::OrchestratorError;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use tm_core::bus::Bus;
use tm_core::config::OrchestratorConfig;
use tm_core::messages::ActionMessage;

pub async fn stop(
    config: &OrchestratorConfig,
    bus: Arc<dyn Bus>,
    handle: &mut RunHandle,
    interrupt: bool,
) -> Result<(), OrchestratorError> {
    if !interrupt {
        publish_action(&bus, config, "end").await?;
    }
    publish_action(&bus, config, "terminate").await?;

    poll_pid_exit(handle.pids.ds.pid, config.pid_poll_interval, config.pid_poll_attempts).await;
    for tm in &handle.pids.tm {
        poll_pid_exit(tm.pid, config.pid_poll_interval, config.pid_poll_attempts).await;
    }

    if let Some(mut child) = handle.local_tds.take() {
        if interrupt {
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }
    for mut child in handle.local_tms.drain(..) {
        if interrupt {
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }

    Ok(())
}

async fn publish_action(bus: &Arc<dyn Bus>, config: &OrchestratorConfig, action: &str) -> Result<(), OrchestratorError> {
    let message = ActionMessage {
        action: action.to_string(),
        group: Some(config.group.clone()),
        directory: None,
        args: Vec::new(),
    };
    bus.publish(&config.bus.channel, &message).await?;
    Ok(())
}

/// Poll `kill(pid, 0)` until the process is gone or the retry budget is
/// exhausted (§4.7 point 3, §9 "PID-liveness polling helpers").
async fn poll_pid_exit(pid: i32, interval: Duration, attempts: u32) {
    for _ in 0..attempts {
        match kill(Pid::from_raw(pid), None) {
            Err(Errno::ESRCH) => return,
            _ => tokio::time::sleep(interval).await,
        }
    }
    tracing::warn!(pid, "pid did not exit within the poll budget");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_core::bus::testing::InMemoryBus;
    use tm_core::config::BusConfig;
    use tm_core::messages::{ParticipantKind, PidEntry, PidTable};
    use tokio::time::Instant;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            bus: BusConfig {
                redis_url: "unused".to_string(),
                channel: "tool-group-default".to_string(),
            },
            benchmark_run_dir: std::env::temp_dir(),
            group: "default".to_string(),
            controller: "localhost".to_string(),
            ssh_binary: "ssh".to_string(),
            pid_poll_interval: Duration::from_millis(1),
            pid_poll_attempts: 5,
        }
    }

    #[tokio::test]
    async fn poll_pid_exit_returns_immediately_for_a_dead_pid() {
        // Very unlikely to be a live pid on any test host.
        let started = Instant::now();
        poll_pid_exit(i32::MAX - 1, Duration::from_millis(1), 5).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn stop_publishes_end_then_terminate() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let config = config();
        let mut sub = bus.subscribe(&config.bus.channel).await.unwrap();

        let mut handle = RunHandle {
            pids: PidTable {
                ds: PidEntry {
                    kind: ParticipantKind::Ds,
                    hostname: "localhost".to_string(),
                    pid: i32::MAX - 1,
                },
                tm: vec![],
            },
            local_tds: None,
            local_tms: vec![],
        };

        stop(&config, bus.clone(), &mut handle, false).await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.payload["action"], "end");
        let second = sub.next().await.unwrap();
        assert_eq!(second.payload["action"], "terminate");
    }

    #[tokio::test]
    async fn interrupt_skips_end() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let config = config();
        let mut sub = bus.subscribe(&config.bus.channel).await.unwrap();

        let mut handle = RunHandle {
            pids: PidTable {
                ds: PidEntry {
                    kind: ParticipantKind::Ds,
                    hostname: "localhost".to_string(),
                    pid: i32::MAX - 1,
                },
                tm: vec![],
            },
            local_tds: None,
            local_tms: vec![],
        };

        stop(&config, bus.clone(), &mut handle, true).await.unwrap();

        let only = sub.next().await.unwrap();
        assert_eq!(only.payload["action"], "terminate");
    }
}
