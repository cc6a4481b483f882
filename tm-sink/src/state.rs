//! Tool Data Sink coarse state (§4.6).

/// Mirrors the action-driven coarse states a TM exposes, with `Send`/
/// `Sysinfo` additionally carrying the directory token the HTTP endpoint
/// must match against incoming `ctx` path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TdsState {
    Startup,
    Idle,
    Send { directory: String },
    Sysinfo { directory: String },
    Shutdown,
}

impl TdsState {
    pub fn directory(&self) -> Option<&str> {
        match self {
            TdsState::Send { directory } | TdsState::Sysinfo { directory } => Some(directory),
            _ => None,
        }
    }
}
