//! DcgmTool: runs a Python sample script under an `--inst=` install
//! directory, with a `PYTHONPATH` derived from the same prefix.

use super::Collector;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

pub struct DcgmCollector {
    install_dir: Option<PathBuf>,
    process: Option<Child>,
    failure: bool,
}

impl DcgmCollector {
    pub fn new(inst_opt: Option<&str>) -> Self {
        Self {
            install_dir: inst_opt.map(PathBuf::from),
            process: None,
            failure: inst_opt.is_none(),
        }
    }

    fn script_path(&self) -> Option<PathBuf> {
        self.install_dir
            .as_ref()
            .map(|dir| dir.join("samples/scripts/dcgm_prometheus.py"))
    }

    fn python_path(&self) -> Option<String> {
        let dir = self.install_dir.as_ref()?;
        Some(format!(
            "{}:{}",
            dir.join("bindings").display(),
            dir.join("bindings/common").display()
        ))
    }
}

#[async_trait]
impl Collector for DcgmCollector {
    fn name(&self) -> &str {
        "dcgm"
    }

    /// No install subcommand either; "install" checks the sample script
    /// exists under the configured `--inst=` directory.
    async fn install(&mut self) -> (bool, String) {
        match self.script_path() {
            Some(script) if script.is_file() => {
                (true, format!("dcgm sample script found at {}", script.display()))
            }
            Some(script) => {
                self.failure = true;
                (false, format!("dcgm sample script not found at {}", script.display()))
            }
            None => {
                self.failure = true;
                (false, "dcgm: no install path given, see --inst=".to_string())
            }
        }
    }

    async fn start(&mut self, _tool_dir: &Path) {
        if self.failure {
            tracing::error!("dcgm: no install path given, see --inst=");
            return;
        }
        let Some(script) = self.script_path() else {
            self.failure = true;
            return;
        };
        if !script.is_file() {
            tracing::info!(path = %script.display(), "dcgm: sample script does not exist");
            self.failure = true;
            return;
        }

        let mut cmd = Command::new("python3");
        cmd.arg(&script).stdout(Stdio::null()).stderr(Stdio::null());
        if let Some(pythonpath) = self.python_path() {
            cmd.env("PYTHONPATH", pythonpath);
        }

        match cmd.spawn() {
            Ok(child) => self.process = Some(child),
            Err(e) => {
                tracing::error!(error = %e, "dcgm: failed to spawn");
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
