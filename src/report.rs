//! Renders the final [`ScanState`] for the operator and to disk.
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use itertools::Itertools;
use log::debug;

use crate::store::{ScanMode, ScanState};

const RULE: usize = 60;

/// Writes `state` as pretty JSON into `dir`, creating it if needed.
/// Returns the path of the new file.
pub fn write_json(state: &ScanState, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let prefix = match state.info.mode {
        ScanMode::Active => "recon_results",
        ScanMode::Passive => "passive_hosts",
    };
    let path = dir.join(format!(
        "{prefix}_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let json = serde_json::to_string_pretty(state)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    debug!("Report written to {}", path.display());
    Ok(path)
}

/// `host -> [p1,p2]` per host with open ports; bare hostnames in passive mode.
pub fn greppable_lines(state: &ScanState) -> Vec<String> {
    state
        .sorted_hosts()
        .into_iter()
        .filter_map(|record| match state.info.mode {
            ScanMode::Passive => Some(record.host.clone()),
            ScanMode::Active if record.ports.is_empty() => None,
            ScanMode::Active => {
                let ports = record
                    .ports
                    .iter()
                    .map(|p| p.port)
                    .sorted_unstable()
                    .map(|p| p.to_string())
                    .join(",");
                Some(format!("{} -> [{ports}]", record.host))
            }
        })
        .collect()
}

/// Human readable end-of-run summary.
pub fn summary(state: &ScanState) -> String {
    let mut out = String::new();
    let hosts = state.sorted_hosts();
    let _ = writeln!(out, "{}", "=".repeat(RULE));
    let _ = writeln!(out, "Scanner: {}", state.info.scanner);
    let _ = writeln!(
        out,
        "Started: {}",
        state.info.start_time.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "Targets: {}", state.info.targets.join(", "));

    if state.info.mode == ScanMode::Passive {
        let _ = writeln!(out, "Total Discovered Hosts: {}", hosts.len());
        let _ = writeln!(out, "{}", "-".repeat(RULE));
        for record in hosts {
            let _ = writeln!(out, "{}", record.host);
        }
        return out;
    }

    let _ = writeln!(out, "Total Live Hosts: {}", hosts.len());
    let _ = writeln!(out, "Total Open Ports: {}", state.open_port_count());
    let _ = writeln!(out, "Unresponsive Hosts: {}", state.unresponsive_hosts);
    let _ = writeln!(out, "{}", "-".repeat(RULE));
    for record in hosts {
        let _ = writeln!(out, "\nHost: {}", record.host);
        if record.ports.is_empty() {
            let _ = writeln!(out, "  No open ports detected");
        }
        for port in &record.ports {
            let _ = writeln!(out, "  {:>5}/tcp  {}", port.port, port.service);
        }
    }
    out
}
