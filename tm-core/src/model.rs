//! Tool Group store (C1)
//!
//! Read-only declarative registry of hosts, tools, per-host tool options,
//! host labels, and an optional trigger text. Backed by a directory tree
//! `tools-<group>/<host>/<tool>` whose file contents are the option string.

use crate::error::GroupError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const LABEL_FILE: &str = "__label__";
const TRIGGER_FILE: &str = "__trigger__";
const NOINSTALL_SUFFIX: &str = "__noinstall__";

/// One host's entry within a tool group: its tools and their option strings,
/// plus an optional label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEntry {
    pub tools: BTreeMap<String, String>,
    pub label: Option<String>,
}

/// A named, read-only declarative set: `{host -> {tool -> options}}` for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolGroup {
    pub name: String,
    hosts: BTreeMap<String, HostEntry>,
    pub trigger: Option<String>,
}

impl ToolGroup {
    /// All host names registered in this group, in sorted order.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// The `{tool -> options}` mapping for a host, or `None` if the host is
    /// not part of this group.
    pub fn get_tools(&self, host: &str) -> Option<&BTreeMap<String, String>> {
        self.hosts.get(host).map(|h| &h.tools)
    }

    /// The label for a host, if any. Absent hosts and hosts with no/empty
    /// `__label__` file both yield `None`.
    pub fn get_label(&self, host: &str) -> Option<&str> {
        self.hosts.get(host).and_then(|h| h.label.as_deref())
    }

    /// List of tool names registered for a host, sorted.
    pub fn list_tools(&self, host: &str) -> Vec<&str> {
        self.get_tools(host)
            .map(|tools| tools.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All distinct tool names across every host in the group, sorted.
    pub fn host_tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .hosts
            .values()
            .flat_map(|h| h.tools.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Loads tool groups from a benchmark run's `tools-<group>/` directory tree.
pub struct ToolGroupStore;

impl ToolGroupStore {
    /// Load the named group from `<run_dir>/tools-<group>/`.
    ///
    /// Fails with [`GroupError::BadToolGroup`] if the group directory is
    /// missing or cannot be resolved, [`GroupError::NotADirectory`] if it
    /// exists but is not a directory.
    pub fn load(run_dir: &Path, group: &str) -> Result<ToolGroup, GroupError> {
        let group_dir = run_dir.join(format!("tools-{group}"));
        let group_dir = fs::canonicalize(&group_dir)
            .map_err(|_| GroupError::BadToolGroup(group.to_string()))?;
        if !group_dir.is_dir() {
            return Err(GroupError::NotADirectory(group.to_string()));
        }

        let trigger = read_trimmed_file(&group_dir.join(TRIGGER_FILE))
            .map_err(|source| GroupError::Io {
                group: group.to_string(),
                source,
            })?
            .filter(|s| !s.is_empty());

        let mut hosts = BTreeMap::new();
        for entry in fs::read_dir(&group_dir).map_err(|source| GroupError::Io {
            group: group.to_string(),
            source,
        })? {
            let entry = entry.map_err(|source| GroupError::Io {
                group: group.to_string(),
                source,
            })?;
            let path = entry.path();
            // Only plain directories, or symlinks resolving to directories,
            // are host entries; anything else (files like a stray
            // __trigger__ that lives at the group level, broken symlinks) is
            // ignored.
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_dir() {
                continue;
            }
            let Some(host_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if host_name == LABEL_FILE || host_name == TRIGGER_FILE {
                continue;
            }
            hosts.insert(host_name.to_string(), load_host_entry(&path)?);
        }

        Ok(ToolGroup {
            name: group.to_string(),
            hosts,
            trigger,
        })
    }
}

fn load_host_entry(host_dir: &Path) -> Result<HostEntry, GroupError> {
    let group_name = host_dir
        .to_string_lossy()
        .into_owned();
    let label = read_trimmed_file(&host_dir.join(LABEL_FILE))
        .map_err(|source| GroupError::Io {
            group: group_name.clone(),
            source,
        })?
        .filter(|s| !s.is_empty());

    let mut tools = BTreeMap::new();
    for entry in fs::read_dir(host_dir).map_err(|source| GroupError::Io {
        group: group_name.clone(),
        source,
    })? {
        let entry = entry.map_err(|source| GroupError::Io {
            group: group_name.clone(),
            source,
        })?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == LABEL_FILE {
            continue;
        }
        // __noinstall__-suffixed tool files mark a tool that is registered
        // but never started on this host; skip them entirely rather than
        // registering them under their stripped name.
        if file_name.ends_with(NOINSTALL_SUFFIX) {
            continue;
        }
        let tool_name = file_name.to_string();
        let opts = fs::read_to_string(&path)
            .map_err(|source| GroupError::Io {
                group: group_name.clone(),
                source,
            })?
            .trim()
            .to_string();
        tools.insert(tool_name, opts);
    }

    Ok(HostEntry { tools, label })
}

fn read_trimmed_file(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Used by callers that need a group directory path without loading it
/// (e.g. the orchestrator, before it has loaded the group itself).
pub fn group_dir(run_dir: &Path, group: &str) -> PathBuf {
    run_dir.join(format!("tools-{group}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn loads_hosts_tools_and_labels() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("tools-default/host-a/sar"), "--interval=10");
        write(&root.join("tools-default/host-a/mpstat"), "");
        write(&root.join("tools-default/host-a/__label__"), "controller\n");
        write(&root.join("tools-default/host-b/sar"), "--interval=5");

        let group = ToolGroupStore::load(root, "default").unwrap();
        assert_eq!(group.name, "default");
        assert_eq!(group.hostnames().count(), 2);
        assert_eq!(group.get_label("host-a"), Some("controller"));
        assert_eq!(group.get_label("host-b"), None);
        assert_eq!(
            group.get_tools("host-a").unwrap().get("sar").unwrap(),
            "--interval=10"
        );
        assert_eq!(group.list_tools("host-b"), vec!["sar"]);
    }

    #[test]
    fn missing_group_dir_is_bad_tool_group() {
        let dir = tempdir().unwrap();
        let err = ToolGroupStore::load(dir.path(), "nonexistent").unwrap_err();
        assert!(matches!(err, GroupError::BadToolGroup(_)));
    }

    #[test]
    fn group_level_file_is_not_a_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("tools-default"), "not a directory");
        let err = ToolGroupStore::load(root, "default").unwrap_err();
        assert!(matches!(err, GroupError::NotADirectory(_)));
    }

    #[test]
    fn trigger_is_present_only_when_nonempty() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("tools-default/host-a/sar"), "");
        write(&root.join("tools-default/__trigger__"), "iteration-start\n");
        let group = ToolGroupStore::load(root, "default").unwrap();
        assert_eq!(group.trigger.as_deref(), Some("iteration-start"));
    }

    #[test]
    fn empty_trigger_file_yields_no_trigger() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("tools-default/host-a/sar"), "");
        write(&root.join("tools-default/__trigger__"), "  \n");
        let group = ToolGroupStore::load(root, "default").unwrap();
        assert_eq!(group.trigger, None);
    }

    #[test]
    fn noinstall_suffixed_tool_is_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("tools-default/host-a/sar__noinstall__"),
            "--interval=10",
        );
        let group = ToolGroupStore::load(root, "default").unwrap();
        assert_eq!(group.list_tools("host-a"), Vec::<&str>::new());
    }
}
