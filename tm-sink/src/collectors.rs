//! Run-wide persistent collectors the TDS itself owns: PCP (pmcd+pmlogger
//! per declaring host) and the Prometheus scraper (one process for the
//! whole run, scraping every declaring host), launched on `init` and
//! stopped in reverse order on `end` (§4.6 points 5-6).

use std::collections::BTreeMap;
use std::path::PathBuf;
use tm_core::model::ToolGroup;
use tm_core::persistent::{Collector, CollectorKind, PcpCollector, PersistentCollector, PromCollector};

/// Node-exporter and DCGM both expose fixed, well-known scrape ports; the
/// tool's option string carries install/device selection, not a port.
fn default_scrape_port(tool: &str) -> &'static str {
    match tool {
        "node-exporter" => "9100",
        "dcgm" => "9400",
        _ => "9100",
    }
}

/// Build one collector per host declaring `collector=pcp`, plus a single
/// aggregating Prometheus collector over every host declaring
/// `collector=prometheus` (node-exporter/dcgm scrape targets).
pub fn build_run_collectors(group: &ToolGroup, tool_group_dir: PathBuf) -> Vec<(String, PersistentCollector)> {
    let mut collectors = Vec::new();

    for host in group.hostnames() {
        for tool in group.list_tools(host) {
            if matches!(CollectorKind::from_tool_metadata(tool), Some(CollectorKind::Pcp)) {
                collectors.push((
                    format!("pcp@{host}"),
                    PersistentCollector::Pcp(PcpCollector::new()),
                ));
            }
        }
    }

    let mut scrape_targets: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for host in group.hostnames() {
        for tool in group.list_tools(host) {
            if matches!(
                CollectorKind::from_tool_metadata(tool),
                Some(CollectorKind::Prometheus)
            ) {
                scrape_targets
                    .entry(host.to_string())
                    .or_default()
                    .push((tool.to_string(), default_scrape_port(tool).to_string()));
            }
        }
    }
    if !scrape_targets.is_empty() {
        collectors.push((
            "prometheus".to_string(),
            PersistentCollector::Prom(PromCollector::new(tool_group_dir, &scrape_targets)),
        ));
    }

    collectors
}

/// Start every collector, in the order `init` discovered them, under
/// `<benchmark_run_dir>/tm/persistent/<label>/`. Returns `(failures, total)`.
pub async fn start_all(collectors: &mut [(String, PersistentCollector)], tm_dir: &std::path::Path) -> (usize, usize) {
    let mut failures = 0;
    for (label, collector) in collectors.iter_mut() {
        let (installed, detail) = collector.install().await;
        if !installed {
            tracing::error!(label, detail, "persistent collector failed to install");
            failures += 1;
            continue;
        }
        let dir = tm_dir.join("persistent").join(label);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(error = %e, label, "failed to create collector directory");
            failures += 1;
            continue;
        }
        collector.start(&dir).await;
        if collector.failed() {
            failures += 1;
        }
    }
    (failures, collectors.len())
}

/// Stop every collector in reverse start order, joining each before moving
/// to the next (§4.6 point 6).
pub async fn stop_all(collectors: &mut Vec<(String, PersistentCollector)>) -> (usize, usize) {
    let total = collectors.len();
    let mut failures = 0;
    while let Some((_, mut collector)) = collectors.pop() {
        collector.stop().await;
        collector.wait().await;
        if collector.failed() {
            failures += 1;
        }
    }
    (failures, total)
}
