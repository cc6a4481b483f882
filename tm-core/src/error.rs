//! Error types shared across the orchestration subsystem

use thiserror::Error;

/// Errors raised while loading or consulting a tool group
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("tool group '{0}' directory does not exist or cannot be resolved")]
    BadToolGroup(String),
    #[error("tool group '{0}' is not a directory")]
    NotADirectory(String),
    #[error("i/o error reading tool group '{group}': {source}")]
    Io {
        group: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by transient-tool and persistent-collector lifecycle methods
#[derive(Error, Debug)]
pub enum ToolException {
    #[error("tool({0}) has an unexpected start process running")]
    StartAlreadyRunning(String),
    #[error("tool({0}) has an unexpected stop process running")]
    StopAlreadyRunning(String),
    #[error("tool({0})'s start process not running")]
    StartNotRunning(String),
    #[error("tool({0}) wait not called after 'stop'")]
    WaitWithoutStop(String),
    #[error("tool({name}) directory '{dir}' does not exist")]
    MissingDirectory { name: String, dir: String },
    #[error("tool({name}) failed to spawn: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool({name}) failed while waiting: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the control bus abstraction (C4)
#[derive(Error, Debug)]
pub enum BusError {
    /// The connection to the broker was lost; fatal to the caller's loop.
    #[error("control bus disconnected")]
    Disconnected,
    #[error("control bus protocol error: {0}")]
    Protocol(String),
    #[error("control bus transport error: {0}")]
    Transport(String),
}

/// Errors raised by the Client API (C8)
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("tool group '{0}' could not be loaded")]
    Group(#[from] GroupError),
    #[error("action '{0}' is not one a client is permitted to publish")]
    DisallowedAction(String),
    #[error("control bus error: {0}")]
    Bus(#[from] BusError),
    #[error("timed out waiting for client-status responses")]
    Timeout,
}

/// Errors raised while parsing or validating wire messages (§6, §7 kind 5)
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("data payload not valid JSON: {0}")]
    NotJson(String),
    #[error("unrecognized keys in message payload")]
    UnrecognizedKeys,
    #[error("unrecognized action '{0}' in message payload")]
    UnrecognizedAction(String),
    #[error("unrecognized group '{0}' in message payload")]
    UnrecognizedGroup(String),
}
