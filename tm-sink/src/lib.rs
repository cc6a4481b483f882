//! Tool Data Sink library crate: the run's central HTTP upload endpoint
//! and persistent-collector coordinator (§4.6).

pub mod bus_watcher;
pub mod collectors;
pub mod http;
pub mod state;
pub mod tracker;

pub use bus_watcher::BusWatcher;
pub use http::SinkState;
pub use state::TdsState;
pub use tracker::Tracker;
