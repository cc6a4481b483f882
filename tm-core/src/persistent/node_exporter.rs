//! NodeExporterTool: discovers the `node_exporter` binary via an `--inst=`
//! install directory and runs it as a single long-lived process.

use super::{which, Collector};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

pub struct NodeExporterCollector {
    install_dir: Option<PathBuf>,
    process: Option<Child>,
    failure: bool,
}

impl NodeExporterCollector {
    /// `inst_opt` is the `--inst=<dir>` option string registered for this
    /// tool; absence marks the collector as failed immediately, matching
    /// the original's "no install path properly given" behavior.
    pub fn new(inst_opt: Option<&str>) -> Self {
        Self {
            install_dir: inst_opt.map(PathBuf::from),
            process: None,
            failure: inst_opt.is_none(),
        }
    }

    fn binary_path(&self) -> Option<PathBuf> {
        self.install_dir
            .as_ref()
            .map(|dir| dir.join("node_exporter"))
            .filter(|p| p.is_file())
            .or_else(|| which("node_exporter"))
    }
}

#[async_trait]
impl Collector for NodeExporterCollector {
    fn name(&self) -> &str {
        "node-exporter"
    }

    /// No install subcommand in the original's tool script; "install"
    /// degrades to the same binary-presence check `start` relies on.
    async fn install(&mut self) -> (bool, String) {
        match self.binary_path() {
            Some(path) => (true, format!("node_exporter found at {}", path.display())),
            None => {
                self.failure = true;
                (false, "node_exporter binary not found".to_string())
            }
        }
    }

    async fn start(&mut self, _tool_dir: &Path) {
        if self.failure {
            tracing::error!("node-exporter: no install path given, see --inst=");
            return;
        }
        let Some(binary) = self.binary_path() else {
            tracing::info!("node-exporter: node_exporter binary not found");
            self.failure = true;
            return;
        };
        match Command::new(binary)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => self.process = Some(child),
            Err(e) => {
                tracing::error!(error = %e, "node-exporter: failed to spawn");
                self.failure = true;
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
    }

    async fn wait(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.wait().await;
        }
    }

    fn failed(&self) -> bool {
        self.failure
    }
}
