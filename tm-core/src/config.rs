//! Environment-derived configuration, one `from_env()` struct per binary
//! instead of a process-wide mutable singleton (redesign flag: "Global
//! 'tar path' and module-level config").

use std::path::PathBuf;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Shared fields every binary needs to reach the Control Bus and the
/// benchmark run directory.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: String,
    pub channel: String,
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("TM_REDIS_URL", "redis://127.0.0.1:17001"),
            channel: env_or("TM_CHANNEL", "tool-group"),
        }
    }
}

/// Tool Meister (C5) configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bus: BusConfig,
    pub benchmark_run_dir: PathBuf,
    pub group: String,
    pub hostname: String,
    pub controller: String,
    pub sink_port: u16,
    pub remote_tmp_root: PathBuf,
    pub put_retry_interval: Duration,
    pub put_retry_attempts: u32,
    pub tools_bin_dir: PathBuf,
    pub sysinfo_scripts_dir: PathBuf,
    /// Bus channel to forward this TM's log lines to, mirroring the
    /// original's `RedisHandler`. `None` (the default) disables forwarding
    /// entirely — logs stay local.
    pub log_forward_channel: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            bus: BusConfig::from_env(),
            benchmark_run_dir: PathBuf::from(env_or("TM_RUN_DIR", "/var/lib/pbench-agent")),
            group: env_or("TM_GROUP", "default"),
            hostname: std::env::var("TM_HOSTNAME").unwrap_or_else(|_| local_hostname()),
            controller: env_or("TM_CONTROLLER", "localhost"),
            sink_port: env_parsed("TM_SINK_PORT", 8080),
            remote_tmp_root: PathBuf::from(env_or("TM_REMOTE_TMP_ROOT", "/var/tmp")),
            put_retry_interval: Duration::from_millis(env_parsed("TM_PUT_RETRY_MS", 100)),
            put_retry_attempts: env_parsed("TM_PUT_RETRY_ATTEMPTS", 200),
            tools_bin_dir: PathBuf::from(env_or("TM_TOOLS_BIN_DIR", "/opt/pbench-agent/tool-scripts")),
            sysinfo_scripts_dir: PathBuf::from(env_or(
                "TM_SYSINFO_SCRIPTS_DIR",
                "/opt/pbench-agent/tool-scripts/sysinfo",
            )),
            log_forward_channel: std::env::var("TM_LOG_FORWARD_CHANNEL").ok(),
        }
    }
}

/// Tool Data Sink (C6) configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub bus: BusConfig,
    pub benchmark_run_dir: PathBuf,
    pub group: String,
    pub bind_addr: String,
    pub port: u16,
    pub max_upload_bytes: u64,
}

impl SinkConfig {
    pub fn from_env() -> Self {
        Self {
            bus: BusConfig::from_env(),
            benchmark_run_dir: PathBuf::from(env_or("TM_RUN_DIR", "/var/lib/pbench-agent")),
            group: env_or("TM_GROUP", "default"),
            bind_addr: env_or("TM_SINK_BIND", "0.0.0.0"),
            port: env_parsed("TM_SINK_PORT", 8080),
            max_upload_bytes: env_parsed("TM_SINK_MAX_UPLOAD_BYTES", 1024 * 1024 * 1024),
        }
    }
}

/// Orchestrator (C7) configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bus: BusConfig,
    pub benchmark_run_dir: PathBuf,
    pub group: String,
    pub controller: String,
    pub ssh_binary: String,
    pub pid_poll_interval: Duration,
    pub pid_poll_attempts: u32,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            bus: BusConfig::from_env(),
            benchmark_run_dir: PathBuf::from(env_or("TM_RUN_DIR", "/var/lib/pbench-agent")),
            group: env_or("TM_GROUP", "default"),
            controller: env_or("TM_CONTROLLER", "localhost"),
            ssh_binary: env_or("TM_SSH_BINARY", "ssh"),
            pid_poll_interval: Duration::from_millis(env_parsed("TM_PID_POLL_MS", 100)),
            pid_poll_attempts: env_parsed("TM_PID_POLL_ATTEMPTS", 50),
        }
    }
}

/// Client API (C8) configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub bus: BusConfig,
    pub benchmark_run_dir: PathBuf,
    pub response_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            bus: BusConfig::from_env(),
            benchmark_run_dir: PathBuf::from(env_or("TM_RUN_DIR", "/var/lib/pbench-agent")),
            response_timeout: Duration::from_millis(env_parsed("TM_CLIENT_TIMEOUT_MS", 100_000)),
        }
    }
}

pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_config_has_defaults() {
        let config = BusConfig {
            redis_url: "redis://127.0.0.1:17001".to_string(),
            channel: "tool-group".to_string(),
        };
        assert_eq!(config.channel, "tool-group");
    }

    #[test]
    fn agent_config_reads_overrides() {
        std::env::set_var("TM_GROUP", "perf-group");
        let config = AgentConfig::from_env();
        assert_eq!(config.group, "perf-group");
        std::env::remove_var("TM_GROUP");
    }
}
