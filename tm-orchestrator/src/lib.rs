//! Orchestrator library: brings up the bus, the Tool Data Sink, and every
//! Tool Meister in dependency order, and tears them down cleanly (§4.7).

pub mod bringup;
pub mod error;
pub mod remote_shell;
pub mod teardown;

pub use bringup::{start, RunHandle};
pub use error::OrchestratorError;
pub use remote_shell::{RemoteShell, SshShell};
pub use teardown::stop;
