//! PromCollector: pulls the `prom/prometheus` container image, writes a
//! scrape config (one target per {host, tool, port}), runs the container
//! with a bind-mounted data volume, and on terminate archives the volume.

use super::Collector;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// One scrape target: `<host>_<tool>` job name at `<host>:<port>`.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    pub host: String,
    pub tool: String,
    pub port: String,
}

pub struct PromCollector {
    tool_group_dir: PathBuf,
    targets: Vec<ScrapeTarget>,
    volume: Option<PathBuf>,
    process: Option<Child>,
    failure: bool,
}

impl PromCollector {
    pub fn new(tool_group_dir: PathBuf, host_tools: &BTreeMap<String, Vec<(String, String)>>) -> Self {
        let mut targets = Vec::new();
        for (host, tools) in host_tools {
            for (tool, port) in tools {
                targets.push(ScrapeTarget {
                    host: host.clone(),
                    tool: tool.clone(),
                    port: port.clone(),
                });
            }
        }
        Self {
            tool_group_dir,
            targets,
            volume: None,
            process: None,
            failure: false,
        }
    }

    fn render_scrape_config(&self) -> String {
        let mut out = String::from("global:\n  scrape_interval: 10s\nscrape_configs:\n");
        for target in &self.targets {
            out.push_str(&format!(
                "  - job_name: '{host}_{tool}'\n    static_configs:\n      - targets: ['{host}:{port}']\n",
                host = target.host,
                tool = target.tool,
                port = target.port,
            ));
        }
        out
    }
}

#[async_trait]
impl Collector for PromCollector {
    fn name(&self) -> &str {
        "prometheus"
    }

    /// Install = `podman` is runnable; the `prom/prometheus` image itself
    /// is pulled lazily at `start`, not checked here.
    async fn install(&mut self) -> (bool, String) {
        match Command::new("podman").arg("--version").output().await {
            Ok(output) if output.status.success() => (
                true,
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ),
            Ok(output) => {
                self.failure = true;
                (false, format!("podman --version exited with {}", output.status))
            }
            Err(e) => {
                self.failure = true;
                (false, format!("podman not available: {e}"))
            }
        }
    }

    async fn start(&mut self, tool_dir: &Path) {
        if self.targets.is_empty() {
            tracing::info!("prometheus: launch aborted, no persistent tools registered");
            return;
        }

        let config_path = tool_dir.join("prometheus.yml");
        if let Err(e) = tokio::fs::write(&config_path, self.render_scrape_config()).await {
            tracing::error!(error = %e, "prometheus: failed to write scrape config");
            self.failure = true;
            return;
        }

        let pull = Command::new("podman")
            .args(["pull", "prom/prometheus"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match pull {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::error!(?status, "prometheus: podman pull failed");
                self.failure = true;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "prometheus: podman not available");
                self.failure = true;
                return;
            }
        }

        let volume = self.tool_group_dir.join("prometheus");
        if let Err(e) = tokio::fs::create_dir_all(&volume).await {
            tracing::error!(error = %e, "prometheus: volume creation failed");
            self.failure = true;
            return;
        }

        let run = Command::new("podman")
            .args([
                "run",
                "-p",
                "9090:9090",
                "-v",
                &format!("{}:/prometheus:Z", volume.display()),
                "-v",
                &format!("{}:/etc/prometheus/prometheus.yml:Z", config_path.display()),
                "prom/prometheus",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match run {
            Ok(child) => {
                self.process = Some(child);
                self.volume = Some(volume);
            }
            Err(e) => {
                tracing::error!(error = %e, "prometheus: podman run failed");
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
        let Some(volume) = &self.volume else {
            return;
        };
        let archive = volume.join("prometheus_data.tar.gz");
        let _ = Command::new("tar")
            .args([
                "--remove-files",
                "--exclude",
                "prometheus/prometheus_data.tar.gz",
                "-zcf",
            ])
            .arg(&archive)
            .arg("-C")
            .arg(&self.tool_group_dir)
            .arg("prometheus")
            .status()
            .await;
    }

    fn failed(&self) -> bool {
        self.failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_target_per_host_tool_port() {
        let mut host_tools = BTreeMap::new();
        host_tools.insert(
            "host-a".to_string(),
            vec![("node-exporter".to_string(), "9100".to_string())],
        );
        let collector = PromCollector::new(PathBuf::from("/tmp/run/tools-default"), &host_tools);
        let rendered = collector.render_scrape_config();
        assert!(rendered.contains("job_name: 'host-a_node-exporter'"));
        assert!(rendered.contains("host-a:9100"));
    }
}
