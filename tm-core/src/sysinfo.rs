//! Sysinfo option enumeration and collection, the data side of the
//! `sysinfo` action's `args` payload (§6).
//!
//! Collection itself is out of scope (§1 Non-goals: "sysinfo collection
//! scripts"); `collect()` is a dispatch/shipping wrapper, the same
//! convention-path external-script invocation [`crate::tool::Tool::start`]
//! uses for transient tools.

use std::fmt;
use std::path::Path;
use tokio::process::Command;

/// One named sysinfo collector. `Sos`, `Ara`, `Stockpile`, and `Insights`
/// are recognized names (they appear in the original's available-options
/// list) but have no collector script, matching the original agent, which
/// also lacks a `dump()` branch for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SysinfoOption {
    Block,
    Libvirt,
    KernelConfig,
    SecurityMitigations,
    Sos,
    Topology,
    Ara,
    Stockpile,
    Insights,
}

impl SysinfoOption {
    pub const ALL: &'static [SysinfoOption] = &[
        Self::Block,
        Self::Libvirt,
        Self::KernelConfig,
        Self::SecurityMitigations,
        Self::Sos,
        Self::Topology,
        Self::Ara,
        Self::Stockpile,
        Self::Insights,
    ];

    pub const DEFAULT: &'static [SysinfoOption] = &[
        Self::Block,
        Self::Libvirt,
        Self::KernelConfig,
        Self::SecurityMitigations,
        Self::Sos,
        Self::Topology,
    ];

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "block" => Self::Block,
            "libvirt" => Self::Libvirt,
            "kernel_config" => Self::KernelConfig,
            "security_mitigations" => Self::SecurityMitigations,
            "sos" => Self::Sos,
            "topology" => Self::Topology,
            "ara" => Self::Ara,
            "stockpile" => Self::Stockpile,
            "insights" => Self::Insights,
            _ => return None,
        })
    }

    fn has_collector(self) -> bool {
        matches!(
            self,
            Self::Block | Self::Libvirt | Self::KernelConfig | Self::SecurityMitigations | Self::Topology
        )
    }
}

impl fmt::Display for SysinfoOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Block => "block",
            Self::Libvirt => "libvirt",
            Self::KernelConfig => "kernel_config",
            Self::SecurityMitigations => "security_mitigations",
            Self::Sos => "sos",
            Self::Topology => "topology",
            Self::Ara => "ara",
            Self::Stockpile => "stockpile",
            Self::Insights => "insights",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SysinfoError {
    #[error("invalid sysinfo option: {0}")]
    InvalidOption(String),
    #[error("sysinfo option '{0}' has no collector")]
    NoCollector(SysinfoOption),
    #[error("sysinfo script for '{0}' failed to run: {1}")]
    Spawn(SysinfoOption, std::io::Error),
    #[error("sysinfo script for '{0}' exited with {1}")]
    NonZeroExit(SysinfoOption, std::process::ExitStatus),
}

/// Expand the `sysinfo` action's `args` (comma-joined option names, or the
/// meta-keywords `all`/`default`/`none`) into a concrete option list.
pub fn expand_options(args: &[String]) -> Result<Vec<SysinfoOption>, SysinfoError> {
    let joined = args.join(",");
    match joined.as_str() {
        "all" => return Ok(SysinfoOption::ALL.to_vec()),
        "default" => return Ok(SysinfoOption::DEFAULT.to_vec()),
        "none" | "" => return Ok(Vec::new()),
        _ => {}
    }
    joined
        .split(',')
        .map(|item| SysinfoOption::parse(item).ok_or_else(|| SysinfoError::InvalidOption(item.to_string())))
        .collect()
}

/// Dispatch `option`'s collection to the externally-provided script at
/// `<scripts_dir>/<option>` and ship its output under `sysinfo_path`
/// (`<sysinfo_dir>/<hostname>/<beg|end>`, per the original's layout).
///
/// The script itself — what it collects, how — is the out-of-scope
/// "collection script body" (§1); this wrapper only locates it by
/// convention, invokes it with the output directory as its sole argument
/// (mirroring `Tool::start`'s `--dir=<tool_dir>` convention), and surfaces
/// its exit status.
pub async fn collect(option: SysinfoOption, scripts_dir: &Path, sysinfo_path: &Path) -> Result<(), SysinfoError> {
    if !option.has_collector() {
        return Err(SysinfoError::NoCollector(option));
    }
    let script = scripts_dir.join(option.to_string());
    let output = Command::new(&script)
        .arg(sysinfo_path)
        .output()
        .await
        .map_err(|e| SysinfoError::Spawn(option, e))?;
    if !output.status.success() {
        return Err(SysinfoError::NonZeroExit(option, output.status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expands_to_fixed_subset() {
        let options = expand_options(&["default".to_string()]).unwrap();
        assert_eq!(options, SysinfoOption::DEFAULT.to_vec());
        assert!(!options.contains(&SysinfoOption::Ara));
    }

    #[test]
    fn all_expands_to_full_set() {
        let options = expand_options(&["all".to_string()]).unwrap();
        assert_eq!(options.len(), SysinfoOption::ALL.len());
    }

    #[test]
    fn none_expands_to_empty() {
        assert!(expand_options(&["none".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn explicit_list_is_parsed() {
        let options = expand_options(&["block,topology".to_string()]).unwrap();
        assert_eq!(options, vec![SysinfoOption::Block, SysinfoOption::Topology]);
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(matches!(
            expand_options(&["not-a-real-option".to_string()]),
            Err(SysinfoError::InvalidOption(_))
        ));
    }

    #[tokio::test]
    async fn collecting_an_uncollected_option_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect(SysinfoOption::Ara, dir.path(), dir.path()).await;
        assert!(matches!(result, Err(SysinfoError::NoCollector(_))));
    }

    #[tokio::test]
    async fn missing_script_surfaces_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect(SysinfoOption::Block, dir.path(), dir.path()).await;
        assert!(matches!(result, Err(SysinfoError::Spawn(..))));
    }
}
