//! Tool Meister state (§4.5)

/// The TM's coarse state. `directory` is carried on `Running` because
/// Invariant (iii) forbids holding more than one active directory at a
/// time; it moves to the runtime's pending-send map on `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmState {
    Startup,
    Idle,
    Running { directory: String },
    Shutdown,
}

impl TmState {
    pub fn name(&self) -> &'static str {
        match self {
            TmState::Startup => "startup",
            TmState::Idle => "idle",
            TmState::Running { .. } => "running",
            TmState::Shutdown => "shutdown",
        }
    }
}
