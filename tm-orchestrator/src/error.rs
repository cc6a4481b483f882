//! Orchestrator-local error type (§7 kind 1, kind 2).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("tool group error: {0}")]
    Group(#[from] tm_core::error::GroupError),
    #[error("tool group '{0}' has no registered hosts")]
    EmptyToolGroup(String),
    #[error("control bus error: {0}")]
    Bus(#[from] tm_core::error::BusError),
    #[error("timed out waiting for the control bus to become ready")]
    BusTimeout,
    #[error("timed out waiting for Tool Data Sink liveness")]
    SinkTimeout,
    #[error("timed out waiting for Tool Meister liveness on host(s): {0:?}")]
    TmTimeout(Vec<String>),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
