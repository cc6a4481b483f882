//! Remote TM spawn collaborator (§4.7 point 5): a trait-behind-interface
//! so tests can substitute a fake shell, with a concrete `ssh`-based
//! implementation matching the original's literal `ssh <host>
//! pbench-tool-meister ...` invocation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;

/// Spawns a Tool Meister on a remote host. Returns the remote process's
/// PID as reported by the remote shell invocation.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn spawn_tm(&self, host: &str, env: &BTreeMap<String, String>) -> std::io::Result<i32>;
}

/// Invokes `ssh <host> env K=V... pbench-tool-meister` and parses the
/// remote `echo $!`-style PID line the wrapper command prints back.
pub struct SshShell {
    ssh_binary: String,
}

impl SshShell {
    pub fn new(ssh_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn spawn_tm(&self, host: &str, env: &BTreeMap<String, String>) -> std::io::Result<i32> {
        let env_assignments: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let remote_command = format!(
            "{} pbench-tool-meister >/dev/null 2>&1 & echo $!",
            env_assignments.join(" ")
        );

        let output = Command::new(&self.ssh_binary)
            .arg(host)
            .arg(remote_command)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "ssh to {host} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i32>()
            .map_err(|e| std::io::Error::other(format!("could not parse remote pid from ssh output: {e}")))
    }
}
