//! The shared result aggregate for one reconnaissance run.
//!
//! [`ResultStore`] is a cheap-to-clone handle around a single
//! reader/writer lock. Every phase writes through it while it runs; the lock is
//! only ever held for a point mutation and never across a network or process
//! call.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde_derive::{Deserialize, Serialize};

/// Which pipeline a run executes.
#[derive(Serialize, Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Passive enumeration, liveness probing, port scan and service labels.
    #[default]
    Active,
    /// Passive enumeration only.
    Passive,
}

/// Informational status attached to a host. Never re-validated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Confirmed reachable by a probe, or seeded for the active port scan.
    Up,
    /// Reported by passive enumeration.
    Discovered,
}

/// Only open ports are ever materialized.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// The port accepted a TCP connection (or was reported open).
    Open,
}

/// A single open TCP port on a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    /// Port number, 1..=65535.
    pub port: u16,
    /// Always [`PortState::Open`].
    pub state: PortState,
    /// Service label, empty until service identification runs.
    pub service: String,
}

impl PortRecord {
    /// An open port without a service label.
    pub fn open(port: u16) -> Self {
        Self {
            port,
            state: PortState::Open,
            service: String::new(),
        }
    }
}

/// Everything known about one host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// IP address or hostname; the dedup key of the store.
    pub host: String,
    /// How the host entered the store.
    pub status: HostStatus,
    /// Open ports, unique by port number when written through the store.
    pub ports: Vec<PortRecord>,
}

impl HostRecord {
    fn new(host: &str, status: HostStatus) -> Self {
        Self {
            host: host.to_owned(),
            status,
            ports: Vec::new(),
        }
    }
}

/// Metadata describing the run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanInfo {
    /// Targets as the operator supplied them, after validation.
    pub targets: Vec<String>,
    /// When the run was created.
    pub start_time: DateTime<Local>,
    /// Scanner name and version.
    pub scanner: String,
    /// Active or passive.
    pub mode: ScanMode,
}

impl ScanInfo {
    /// Metadata stamped with the current time and this crate's version.
    pub fn new(targets: Vec<String>, mode: ScanMode) -> Self {
        Self {
            targets,
            start_time: Local::now(),
            scanner: format!("netdive v{}", env!("CARGO_PKG_VERSION")),
            mode,
        }
    }
}

/// The payload held by [`ResultStore`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    /// Run metadata.
    pub info: ScanInfo,
    /// Host identifier to record.
    pub hosts: HashMap<String, HostRecord>,
    /// Hosts that were probed but never answered.
    pub unresponsive_hosts: usize,
}

impl ScanState {
    /// Host records ordered by host identifier, for stable reporting.
    pub fn sorted_hosts(&self) -> Vec<&HostRecord> {
        let mut hosts = self.hosts.values().collect::<Vec<_>>();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        hosts
    }

    /// Total number of open ports across all hosts.
    pub fn open_port_count(&self) -> usize {
        self.hosts.values().map(|h| h.ports.len()).sum()
    }
}

/// Shared, lock-guarded handle to the run's [`ScanState`].
#[derive(Debug, Clone)]
pub struct ResultStore {
    inner: Arc<RwLock<ScanState>>,
}

impl ResultStore {
    /// Creates an empty store for a new run.
    pub fn new(info: ScanInfo) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ScanState {
                info,
                hosts: HashMap::new(),
                unresponsive_hosts: 0,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ScanState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScanState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a host if it is not present yet. Returns `true` when inserted;
    /// an existing record (and its status) is left untouched.
    pub fn insert_host(&self, host: &str, status: HostStatus) -> bool {
        let mut state = self.write();
        if state.hosts.contains_key(host) {
            return false;
        }
        state
            .hosts
            .insert(host.to_owned(), HostRecord::new(host, status));
        true
    }

    /// Replaces the port set of `host` with `ports`, creating the host with
    /// status `up` when missing. Duplicate port numbers in `ports` collapse.
    pub fn replace_ports(&self, host: &str, ports: Vec<PortRecord>) {
        let mut state = self.write();
        let record = state
            .hosts
            .entry(host.to_owned())
            .or_insert_with(|| HostRecord::new(host, HostStatus::Up));
        record.ports.clear();
        push_unique(&mut record.ports, ports);
    }

    /// Appends ports to `host` skipping port numbers it already has, creating
    /// the host with status `up` when missing.
    pub fn merge_ports(&self, host: &str, ports: impl IntoIterator<Item = PortRecord>) {
        let mut state = self.write();
        let record = state
            .hosts
            .entry(host.to_owned())
            .or_insert_with(|| HostRecord::new(host, HostStatus::Up));
        push_unique(&mut record.ports, ports);
    }

    /// Sets the service label of one port. Returns `false` if the host or
    /// port is unknown.
    pub fn set_service(&self, host: &str, port: u16, service: String) -> bool {
        let mut state = self.write();
        let Some(record) = state.hosts.get_mut(host) else {
            return false;
        };
        match record.ports.iter_mut().find(|p| p.port == port) {
            Some(entry) => {
                entry.service = service;
                true
            }
            None => false,
        }
    }

    /// Records how many probed hosts never answered.
    pub fn set_unresponsive(&self, count: usize) {
        self.write().unresponsive_hosts = count;
    }

    /// Copy of the ports currently recorded for `host`.
    pub fn ports(&self, host: &str) -> Option<Vec<PortRecord>> {
        self.read().hosts.get(host).map(|h| h.ports.clone())
    }

    /// Per-host ports for those of `hosts` that have at least one open port.
    pub fn open_ports_for(&self, hosts: &[String]) -> HashMap<String, Vec<PortRecord>> {
        let state = self.read();
        hosts
            .iter()
            .filter_map(|host| state.hosts.get(host))
            .filter(|record| !record.ports.is_empty())
            .map(|record| (record.host.clone(), record.ports.clone()))
            .collect()
    }

    /// Read-only copy of the whole state for reporting.
    pub fn snapshot(&self) -> ScanState {
        self.read().clone()
    }
}

fn push_unique(existing: &mut Vec<PortRecord>, ports: impl IntoIterator<Item = PortRecord>) {
    for port in ports {
        if !existing.iter().any(|p| p.port == port.port) {
            existing.push(port);
        }
    }
}

#[cfg(test)]
impl ResultStore {
    pub(crate) fn contains(&self, host: &str) -> bool {
        self.read().hosts.contains_key(host)
    }

    pub(crate) fn status(&self, host: &str) -> Option<HostStatus> {
        self.read().hosts.get(host).map(|h| h.status)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().hosts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.read().hosts.is_empty()
    }

    pub(crate) fn unresponsive(&self) -> usize {
        self.read().unresponsive_hosts
    }
}
