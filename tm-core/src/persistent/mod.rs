//! Persistent Collector (C3)
//!
//! Long-lived processes (node-exporter, DCGM, PCP, Prometheus) kept up
//! across start/stop cycles and terminated only at `end`.

mod dcgm;
mod node_exporter;
mod pcp;
mod prom;

pub use dcgm::DcgmCollector;
pub use node_exporter::NodeExporterCollector;
pub use pcp::PcpCollector;
pub use prom::PromCollector;

use async_trait::async_trait;
use std::path::Path;

/// Common contract for every persistent-collector variant.
///
/// `start` creates `<tool_dir>/<name>/` and spawns the supervised
/// process(es). Failure to install marks [`Collector::failed`] rather than
/// propagating an error: a failed collector is counted by the caller but
/// does not stop other tools from starting (§4.3 failure policy).
#[async_trait]
pub trait Collector: Send {
    fn name(&self) -> &str;

    /// Discover/verify the collector's binary (or container image) is
    /// available, the same "install" step `Tool::install` performs for a
    /// transient tool (§4.3 common contract: "Install = binary found").
    /// Returns whether the binary was found and a short diagnostic.
    async fn install(&mut self) -> (bool, String);

    async fn start(&mut self, tool_dir: &Path);

    /// Issue a graceful terminate to the supervised process(es). Idempotent.
    async fn stop(&mut self);

    /// Join and clear process handles.
    async fn wait(&mut self);

    /// Whether this collector failed to install/start.
    fn failed(&self) -> bool;
}

/// Sum type over every persistent-collector variant (design note:
/// "Duck-typed tool hierarchy" replaced with a sum type).
pub enum PersistentCollector {
    NodeExporter(NodeExporterCollector),
    Dcgm(DcgmCollector),
    Pcp(PcpCollector),
    Prom(PromCollector),
}

#[async_trait]
impl Collector for PersistentCollector {
    fn name(&self) -> &str {
        match self {
            PersistentCollector::NodeExporter(c) => c.name(),
            PersistentCollector::Dcgm(c) => c.name(),
            PersistentCollector::Pcp(c) => c.name(),
            PersistentCollector::Prom(c) => c.name(),
        }
    }

    async fn install(&mut self) -> (bool, String) {
        match self {
            PersistentCollector::NodeExporter(c) => c.install().await,
            PersistentCollector::Dcgm(c) => c.install().await,
            PersistentCollector::Pcp(c) => c.install().await,
            PersistentCollector::Prom(c) => c.install().await,
        }
    }

    async fn start(&mut self, tool_dir: &Path) {
        match self {
            PersistentCollector::NodeExporter(c) => c.start(tool_dir).await,
            PersistentCollector::Dcgm(c) => c.start(tool_dir).await,
            PersistentCollector::Pcp(c) => c.start(tool_dir).await,
            PersistentCollector::Prom(c) => c.start(tool_dir).await,
        }
    }

    async fn stop(&mut self) {
        match self {
            PersistentCollector::NodeExporter(c) => c.stop().await,
            PersistentCollector::Dcgm(c) => c.stop().await,
            PersistentCollector::Pcp(c) => c.stop().await,
            PersistentCollector::Prom(c) => c.stop().await,
        }
    }

    async fn wait(&mut self) {
        match self {
            PersistentCollector::NodeExporter(c) => c.wait().await,
            PersistentCollector::Dcgm(c) => c.wait().await,
            PersistentCollector::Pcp(c) => c.wait().await,
            PersistentCollector::Prom(c) => c.wait().await,
        }
    }

    fn failed(&self) -> bool {
        match self {
            PersistentCollector::NodeExporter(c) => c.failed(),
            PersistentCollector::Dcgm(c) => c.failed(),
            PersistentCollector::Pcp(c) => c.failed(),
            PersistentCollector::Prom(c) => c.failed(),
        }
    }
}

/// Which persistent collector a tool declares via its `collector=` metadata
/// (§4.6 point 5: used by the Tool Data Sink to decide which persistent
/// collectors to launch for a run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    NodeExporter,
    Dcgm,
    Pcp,
    Prometheus,
}

impl CollectorKind {
    pub fn from_tool_metadata(value: &str) -> Option<Self> {
        match value {
            "node-exporter" => Some(CollectorKind::NodeExporter),
            "dcgm" => Some(CollectorKind::Dcgm),
            "pcp" => Some(CollectorKind::Pcp),
            "prometheus" => Some(CollectorKind::Prometheus),
            _ => None,
        }
    }
}

/// Look up an executable by name the way the original agent resolves
/// tool/collector binaries: search `PATH`, return the first hit.
pub(crate) fn which(bin: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_kind_maps_known_metadata() {
        assert_eq!(
            CollectorKind::from_tool_metadata("prometheus"),
            Some(CollectorKind::Prometheus)
        );
        assert_eq!(CollectorKind::from_tool_metadata("unknown"), None);
    }
}
