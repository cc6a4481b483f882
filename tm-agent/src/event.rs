//! TM-local view of an action message: the six documented verbs plus
//! `terminate`, with their payloads unpacked (§4.5, §6).

use thiserror::Error;
use tm_core::messages::ActionMessage;

#[derive(Debug, Clone)]
pub enum Event {
    Init,
    Start { directory: String },
    Stop,
    Send,
    Sysinfo { args: Vec<String> },
    End,
    Terminate,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("action '{action}' requires a directory")]
    MissingDirectory { action: String },
    #[error("unrecognized action '{0}'")]
    UnrecognizedAction(String),
}

impl Event {
    pub fn from_action(msg: &ActionMessage) -> Result<Self, EventError> {
        match msg.action.as_str() {
            "init" => Ok(Event::Init),
            "start" => Ok(Event::Start {
                directory: msg
                    .directory
                    .clone()
                    .ok_or_else(|| EventError::MissingDirectory { action: "start".to_string() })?,
            }),
            "stop" => Ok(Event::Stop),
            "send" => Ok(Event::Send),
            "sysinfo" => Ok(Event::Sysinfo { args: msg.args.clone() }),
            "end" => Ok(Event::End),
            "terminate" => Ok(Event::Terminate),
            other => Err(EventError::UnrecognizedAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(action: &str, directory: Option<&str>) -> ActionMessage {
        ActionMessage {
            action: action.to_string(),
            group: Some("default".to_string()),
            directory: directory.map(str::to_string),
            args: vec![],
        }
    }

    #[test]
    fn start_without_directory_is_rejected() {
        let msg = action("start", None);
        assert!(matches!(Event::from_action(&msg), Err(EventError::MissingDirectory { .. })));
    }

    #[test]
    fn start_with_directory_carries_it() {
        let msg = action("start", Some("/run/1"));
        match Event::from_action(&msg).unwrap() {
            Event::Start { directory } => assert_eq!(directory, "/run/1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
