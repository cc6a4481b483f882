//! Effects produced by a transition, executed by the runtime (§4.5).

#[derive(Debug, Clone)]
pub enum Effect {
    StartPersistentCollectors,
    StartTransientTools { directory: String },
    StopTransientTools { directory: String },
    Send,
    RunSysinfo { args: Vec<String> },
    StopPersistentCollectors,
    Exit,
}
