//! Transient tool instance (C2)
//!
//! One running instance of a measurement script on a host: start/stop/wait
//! lifecycle, writing output under a per-host directory.

use crate::error::ToolException;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tokio::time::sleep;

const PID_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PID_WAIT_MAX_POLLS: u32 = 100;

/// A single measurement-tool script running in the background on this host.
///
/// At most one start-process and one stop-process may be alive at once;
/// `wait()` must follow `stop()`.
pub struct Tool {
    name: String,
    tool_opts: String,
    tool_script: PathBuf,
    start_process: Option<Child>,
    stop_process: Option<Child>,
}

impl Tool {
    pub fn new(name: impl Into<String>, tool_opts: impl Into<String>, tool_script: PathBuf) -> Self {
        Self {
            name: name.into(),
            tool_opts: tool_opts.into(),
            tool_script,
            start_process: None,
            stop_process: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_no_processes(&self) -> Result<(), ToolException> {
        if self.start_process.is_some() {
            return Err(ToolException::StartAlreadyRunning(self.name.clone()));
        }
        if self.stop_process.is_some() {
            return Err(ToolException::StopAlreadyRunning(self.name.clone()));
        }
        Ok(())
    }

    /// Spawn the tool script with `--start --dir=<tool_dir> <opts>`,
    /// redirecting stdout/stderr to `tm-<name>-start.{out,err}` under
    /// `tool_dir`.
    pub async fn start(&mut self, tool_dir: &Path) -> Result<(), ToolException> {
        self.check_no_processes()?;
        if !tool_dir.is_dir() {
            return Err(ToolException::MissingDirectory {
                name: self.name.clone(),
                dir: tool_dir.display().to_string(),
            });
        }

        let out = File::create(tool_dir.join(format!("tm-{}-start.out", self.name)))
            .await
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?
            .into_std()
            .await;
        let err = File::create(tool_dir.join(format!("tm-{}-start.err", self.name)))
            .await
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?
            .into_std()
            .await;

        let child = Command::new(&self.tool_script)
            .arg("--start")
            .arg(format!("--dir={}", tool_dir.display()))
            .arg(&self.tool_opts)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?;

        self.start_process = Some(child);
        Ok(())
    }

    /// Stop the running tool. Polls for up to 10s for
    /// `<tool_dir>/<name>/<name>.pid` to appear before issuing the stop
    /// script; proceeds anyway (with a warning) if it never shows up.
    pub async fn stop(&mut self, tool_dir: &Path) -> Result<(), ToolException> {
        if self.start_process.is_none() {
            return Err(ToolException::StartNotRunning(self.name.clone()));
        }
        if self.stop_process.is_some() {
            return Err(ToolException::StopAlreadyRunning(self.name.clone()));
        }

        let pid_file = tool_dir.join(&self.name).join(format!("{}.pid", self.name));
        let mut seen = false;
        for _ in 0..PID_WAIT_MAX_POLLS {
            if pid_file.exists() {
                seen = true;
                break;
            }
            sleep(PID_WAIT_POLL_INTERVAL).await;
        }
        if !seen {
            tracing::warn!(
                tool = %self.name,
                pid_file = %pid_file.display(),
                "pid file does not exist after waiting 10 seconds"
            );
        }

        let out = File::create(tool_dir.join(format!("tm-{}-stop.out", self.name)))
            .await
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?
            .into_std()
            .await;
        let err = File::create(tool_dir.join(format!("tm-{}-stop.err", self.name)))
            .await
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?
            .into_std()
            .await;

        let child = Command::new(&self.tool_script)
            .arg("--stop")
            .arg(format!("--dir={}", tool_dir.display()))
            .arg(&self.tool_opts)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?;

        self.stop_process = Some(child);
        Ok(())
    }

    /// Wait for the stop-process to exit, then the start-process; clears
    /// both handles. Must follow a prior `stop()`.
    pub async fn wait(&mut self) -> Result<(), ToolException> {
        let Some(mut stop_process) = self.stop_process.take() else {
            return Err(ToolException::WaitWithoutStop(self.name.clone()));
        };
        stop_process
            .wait()
            .await
            .map_err(|source| ToolException::Wait {
                name: self.name.clone(),
                source,
            })?;

        if let Some(mut start_process) = self.start_process.take() {
            start_process
                .wait()
                .await
                .map_err(|source| ToolException::Wait {
                    name: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Spawn the tool script with `--install <opts>`, returning its exit
    /// status and captured combined output.
    pub async fn install(&self) -> Result<(bool, String), ToolException> {
        let output = Command::new(&self.tool_script)
            .arg("--install")
            .arg(&self.tool_opts)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ToolException::Spawn {
                name: self.name.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn script_printing(body: &str) -> PathBuf {
        let dir = tempdir().unwrap().into_path();
        let path = dir.join("tool-script");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn start_requires_existing_directory() {
        let script = script_printing("exit 0");
        let mut tool = Tool::new("sar", "", script);
        let missing = PathBuf::from("/nonexistent/tool/dir/for/test");
        let err = tool.start(&missing).await.unwrap_err();
        assert!(matches!(err, ToolException::MissingDirectory { .. }));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let script = script_printing("sleep 1");
        let dir = tempdir().unwrap();
        let mut tool = Tool::new("sar", "", script);
        tool.start(dir.path()).await.unwrap();
        let err = tool.start(dir.path()).await.unwrap_err();
        assert!(matches!(err, ToolException::StartAlreadyRunning(_)));
        tool.stop(dir.path()).await.unwrap();
        tool.wait().await.unwrap();
    }

    #[tokio::test]
    async fn wait_without_stop_is_rejected() {
        let script = script_printing("exit 0");
        let mut tool = Tool::new("sar", "", script);
        let err = tool.wait().await.unwrap_err();
        assert!(matches!(err, ToolException::WaitWithoutStop(_)));
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let script = script_printing("exit 0");
        let dir = tempdir().unwrap();
        let mut tool = Tool::new("sar", "", script);
        let err = tool.stop(dir.path()).await.unwrap_err();
        assert!(matches!(err, ToolException::StartNotRunning(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_completes() {
        let script = script_printing("exit 0");
        let dir = tempdir().unwrap();
        let mut tool = Tool::new("sar", "--interval=1", script);
        tool.start(dir.path()).await.unwrap();
        tool.stop(dir.path()).await.unwrap();
        tool.wait().await.unwrap();
    }
}
