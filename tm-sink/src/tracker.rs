//! Per-TM tracking map and the `posted` condition-variable-equivalent
//! (§4.6 points 2-3, §5 "TDS tracking map and state: exclusive under TDS
//! lock").

use std::collections::BTreeMap;
use std::sync::Mutex;
use tm_core::model::ToolGroup;
use tm_core::persistent::CollectorKind;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posted {
    Dormant,
    Waiting,
}

struct TmRecord {
    has_transient_tools: bool,
    is_local: bool,
    posted: Posted,
}

/// Guards the tracking map with a plain `Mutex` (held only across quick,
/// non-blocking map mutations) and uses `Notify` as the condition-variable
/// equivalent for "wait until every tracked TM is dormant again".
pub struct Tracker {
    records: Mutex<BTreeMap<String, TmRecord>>,
    notify: Notify,
}

impl Tracker {
    /// Build the map from the group's declared hosts, classifying each
    /// host's tools as transient if any tool name does not map to a known
    /// persistent-collector kind. `controller_hostname` marks the one host
    /// (if any) whose TM is local to the Tool Data Sink — its data never
    /// travels over HTTP (§4.5 "Directory handling"), so it must never be
    /// waited on by `mark_all_waiting`/`await_all_dormant` (§4.6 point 3:
    /// "every **non-local**, transient-bearing TM").
    pub fn from_group(group: &ToolGroup, controller_hostname: &str) -> Self {
        let mut records = BTreeMap::new();
        for host in group.hostnames() {
            let has_transient_tools = group
                .list_tools(host)
                .into_iter()
                .any(|tool| CollectorKind::from_tool_metadata(tool).is_none());
            records.insert(
                host.to_string(),
                TmRecord {
                    has_transient_tools,
                    is_local: host == controller_hostname,
                    posted: Posted::Dormant,
                },
            );
        }
        Self {
            records: Mutex::new(records),
            notify: Notify::new(),
        }
    }

    /// Flip every non-local, transient-bearing TM's `posted` from `Dormant`
    /// to `Waiting`, in preparation for a data-moving action.
    pub fn mark_all_waiting(&self) {
        let mut records = self.records.lock().unwrap();
        for record in records.values_mut() {
            if record.has_transient_tools && !record.is_local {
                record.posted = Posted::Waiting;
            }
        }
    }

    /// Flip one host's `posted` back to `Dormant` and wake any waiter.
    pub fn mark_dormant(&self, host: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(host) {
            record.posted = Posted::Dormant;
        }
        drop(records);
        self.notify.notify_waiters();
    }

    fn all_dormant(&self) -> bool {
        self.records
            .lock()
            .unwrap()
            .values()
            .all(|r| r.posted == Posted::Dormant)
    }

    /// Block until every transient-bearing TM has reported `Dormant` again.
    ///
    /// Registers as a `Notify` listener *before* checking the condition
    /// (via `enable()`) so a `mark_dormant` landing between the check and
    /// the await can't fire `notify_waiters` into an empty room and hang
    /// this call forever.
    pub async fn await_all_dormant(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.all_dormant() {
                return;
            }
            notified.await;
        }
    }

    /// Whether `ctx` is a recognized host at all (used to validate PUT
    /// requests before touching the filesystem).
    pub fn knows_host(&self, host: &str) -> bool {
        self.records.lock().unwrap().contains_key(host)
    }

    /// Whether `host` is currently expected to post data, i.e. a `send`/
    /// `sysinfo` is in flight and this host hasn't uploaded yet. A PUT
    /// arriving for a host the tracker doesn't have in `Waiting` (an
    /// unexpected or duplicate upload) must be rejected rather than
    /// processed (§7 kind 6 / the original's re-check under its lock).
    pub fn is_waiting(&self, host: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .get(host)
            .is_some_and(|r| r.posted == Posted::Waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn group_with(hosts: &[(&str, &[&str])]) -> ToolGroup {
        let dir = tempfile::tempdir().unwrap();
        for (host, tools) in hosts {
            for tool in *tools {
                let path = dir.path().join("tools-default").join(host).join(tool);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, "").unwrap();
            }
        }
        tm_core::model::ToolGroupStore::load(dir.path(), "default").unwrap()
    }

    #[test]
    fn host_with_only_persistent_tools_is_not_transient() {
        let group = group_with(&[("host-a", &["node-exporter"])]);
        let tracker = Tracker::from_group(&group, "controller");
        tracker.mark_all_waiting();
        // host-a has no transient tools, so it never blocks all_dormant.
        assert!(tracker.all_dormant());
    }

    #[test]
    fn local_host_is_excluded_from_mark_all_waiting() {
        let group = group_with(&[("controller", &["sar"]), ("remote", &["sar"])]);
        let tracker = Tracker::from_group(&group, "controller");
        tracker.mark_all_waiting();
        // The local host never posts over HTTP, so it must not block
        // await_all_dormant even though it has a transient tool.
        assert!(!tracker.is_waiting("controller"));
        assert!(tracker.is_waiting("remote"));
    }

    #[tokio::test]
    async fn await_all_dormant_unblocks_after_mark_dormant() {
        let group = group_with(&[("host-a", &["sar"])]);
        let tracker = Arc::new(Tracker::from_group(&group, "controller"));
        tracker.mark_all_waiting();
        assert!(!tracker.all_dormant());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker.await_all_dormant().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.mark_dormant("host-a");
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
