//! Wire message types exchanged over the Control Bus (§6).

use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `kind` discriminator shared by client-status and liveness messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Tm,
    Ds,
}

const KNOWN_ACTIONS: &[&str] = &["init", "start", "stop", "send", "end", "sysinfo", "terminate"];

/// Published by the driver, consumed by the TDS and every TM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    pub action: String,
    pub group: Option<String>,
    pub directory: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ActionMessage {
    /// Reject unknown actions and, when a group is in scope, mismatched
    /// group names (§7 kind 5: protocol violation).
    pub fn validate(&self, expected_group: Option<&str>) -> Result<(), MessageError> {
        if !KNOWN_ACTIONS.contains(&self.action.as_str()) {
            return Err(MessageError::UnrecognizedAction(self.action.clone()));
        }
        if let (Some(expected), Some(got)) = (expected_group, self.group.as_deref()) {
            if expected != got {
                return Err(MessageError::UnrecognizedGroup(got.to_string()));
            }
        }
        Ok(())
    }
}

/// Published by the TDS and each TM after every action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatusMessage {
    pub kind: ParticipantKind,
    pub hostname: String,
    pub status: String,
}

impl ClientStatusMessage {
    pub const SUCCESS: &'static str = "success";

    pub fn success(kind: ParticipantKind, hostname: impl Into<String>) -> Self {
        Self {
            kind,
            hostname: hostname.into(),
            status: Self::SUCCESS.to_string(),
        }
    }

    pub fn failure(kind: ParticipantKind, hostname: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            hostname: hostname.into(),
            status: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

/// Published once at startup on `<channel>-start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessMessage {
    pub kind: ParticipantKind,
    pub hostname: String,
    pub pid: i32,
}

/// Written by the orchestrator under key `tm-<group>-<host>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmParams {
    pub benchmark_run_dir: String,
    pub channel: String,
    pub controller: String,
    pub group: String,
    pub hostname: String,
    pub tools: BTreeMap<String, String>,
}

/// Written by the orchestrator under key `tds-<group>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdsParams {
    pub benchmark_run_dir: String,
    pub channel: String,
    pub controller: String,
    pub group: String,
    pub bind_addr: String,
    pub port: u16,
}

/// One entry of the `tm-pids` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidEntry {
    pub kind: ParticipantKind,
    pub hostname: String,
    pub pid: i32,
}

/// Written under `tm-pids` by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidTable {
    pub ds: PidEntry,
    pub tm: Vec<PidEntry>,
}

impl PidTable {
    /// Returns every recorded PID still alive, used by the orchestrator's
    /// shutdown-confirmation poll.
    pub fn all_pids(&self) -> Vec<i32> {
        std::iter::once(self.ds.pid)
            .chain(self.tm.iter().map(|e| e.pid))
            .collect()
    }
}

/// Parse a bus payload, rejecting anything with keys the receiver doesn't
/// recognize (§7 kind 5). `serde`'s `deny_unknown_fields` cannot be used on
/// `ActionMessage` because `args` is intentionally action-specific and
/// schema-free, so unknown-key rejection is done by hand against the fixed
/// top-level key set.
pub fn parse_action_message(raw: &str) -> Result<ActionMessage, MessageError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| MessageError::NotJson(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(MessageError::NotJson("payload is not a JSON object".to_string()));
    };
    const KNOWN_KEYS: &[&str] = &["action", "group", "directory", "args"];
    if object.keys().any(|k| !KNOWN_KEYS.contains(&k.as_str())) {
        return Err(MessageError::UnrecognizedKeys);
    }
    serde_json::from_value(value).map_err(|e| MessageError::NotJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_message_round_trips() {
        let raw = r#"{"action":"start","group":"default","directory":null,"args":[]}"#;
        let msg = parse_action_message(raw).unwrap();
        assert_eq!(msg.action, "start");
        assert_eq!(msg.group.as_deref(), Some("default"));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let raw = r#"{"action":"start","group":"default","directory":null,"args":[],"bogus":1}"#;
        assert!(matches!(parse_action_message(raw), Err(MessageError::UnrecognizedKeys)));
    }

    #[test]
    fn unrecognized_action_is_rejected() {
        let msg = ActionMessage {
            action: "explode".to_string(),
            group: None,
            directory: None,
            args: vec![],
        };
        assert!(matches!(msg.validate(None), Err(MessageError::UnrecognizedAction(_))));
    }

    #[test]
    fn mismatched_group_is_rejected() {
        let msg = ActionMessage {
            action: "start".to_string(),
            group: Some("other".to_string()),
            directory: None,
            args: vec![],
        };
        assert!(matches!(msg.validate(Some("default")), Err(MessageError::UnrecognizedGroup(_))));
    }

    #[test]
    fn client_status_success_round_trips() {
        let msg = ClientStatusMessage::success(ParticipantKind::Tm, "host-a");
        let rendered = serde_json::to_string(&msg).unwrap();
        let parsed: ClientStatusMessage = serde_json::from_str(&rendered).unwrap();
        assert!(parsed.is_success());
    }

    #[test]
    fn pid_table_collects_all_pids() {
        let table = PidTable {
            ds: PidEntry {
                kind: ParticipantKind::Ds,
                hostname: "controller".to_string(),
                pid: 100,
            },
            tm: vec![PidEntry {
                kind: ParticipantKind::Tm,
                hostname: "host-a".to_string(),
                pid: 200,
            }],
        };
        assert_eq!(table.all_pids(), vec![100, 200]);
    }
}
