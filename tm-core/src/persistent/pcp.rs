//! PCP transient pair (pmcd + pmlogger), treated as one collector with two
//! cooperating long-lived children spawned and terminated together.
//!
//! The control-file approach (invoking `pmlogger_check`/`pmie_check`
//! against a generated `control.d` file) also exists in the original agent
//! but is treated as a future option, not implemented here (see
//! DESIGN.md's Open Questions resolution).

use super::{which, Collector};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

pub struct PcpCollector {
    log_dir: Option<std::path::PathBuf>,
    pmcd: Option<Child>,
    pmlogger: Option<Child>,
    failure: bool,
}

impl PcpCollector {
    pub fn new() -> Self {
        Self {
            log_dir: None,
            pmcd: None,
            pmlogger: None,
            failure: false,
        }
    }
}

impl Default for PcpCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for PcpCollector {
    fn name(&self) -> &str {
        "pcp"
    }

    /// Both `pmcd` and `pmlogger` must be on `PATH` for the direct pair to
    /// start.
    async fn install(&mut self) -> (bool, String) {
        let pmcd = which("pmcd");
        let pmlogger = which("pmlogger");
        match (pmcd, pmlogger) {
            (Some(_), Some(_)) => (true, "pmcd and pmlogger found".to_string()),
            (None, _) => {
                self.failure = true;
                (false, "pmcd binary not found".to_string())
            }
            (_, None) => {
                self.failure = true;
                (false, "pmlogger binary not found".to_string())
            }
        }
    }

    async fn start(&mut self, tool_dir: &Path) {
        let log_dir = tool_dir.join("pcp");
        if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
            tracing::error!(error = %e, "pcp: failed to create log directory");
            self.failure = true;
            return;
        }

        match Command::new("pmcd")
            .arg("-f")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => self.pmcd = Some(child),
            Err(e) => {
                tracing::error!(error = %e, "pcp: failed to spawn pmcd");
                self.failure = true;
                return;
            }
        }

        match Command::new("pmlogger")
            .arg("-r")
            .arg("-T1m")
            .arg(log_dir.join("pmlogger.archive"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => self.pmlogger = Some(child),
            Err(e) => {
                tracing::error!(error = %e, "pcp: failed to spawn pmlogger");
                self.failure = true;
            }
        }

        self.log_dir = Some(log_dir);
    }

    async fn stop(&mut self) {
        if let Some(child) = self.pmlogger.as_mut() {
            let _ = child.start_kill();
        }
        if let Some(child) = self.pmcd.as_mut() {
            let _ = child.start_kill();
        }
    }

    async fn wait(&mut self) {
        if let Some(mut child) = self.pmlogger.take() {
            let _ = child.wait().await;
        }
        if let Some(mut child) = self.pmcd.take() {
            let _ = child.wait().await;
        }
    }

    fn failed(&self) -> bool {
        self.failure
    }
}
