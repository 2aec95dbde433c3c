//! Two-phase host liveness detection.
//!
//! Phase 1 runs a one-shot reachability probe (the system `ping`) against
//! every target at full concurrency. Phase 2 retries the silent targets with
//! TCP connects to a handful of common ports, under a lower ceiling. Live
//! hosts are written to the store as soon as they are found.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use itertools::Itertools;
use log::debug;

use crate::pool::{WorkerPool, LIVENESS_FALLBACK_CEILING};
use crate::scanner::{connect, CONNECT_TIMEOUT};
use crate::store::{HostStatus, ResultStore};
use crate::tool::{ExternalTool, ToolError};
use crate::tui::{Event, Liveness, Reporter};

/// Ports tried, in order, when a host ignores the reachability probe.
pub const FALLBACK_PORTS: [u16; 9] = [80, 443, 22, 21, 25, 53, 135, 139, 445];

/// Hard limit on one reachability probe.
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one discovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Live hosts in target order.
    pub live: Vec<String>,
    /// Targets probed.
    pub total: usize,
    /// Live through the reachability probe.
    pub by_ping: usize,
    /// Live through the TCP fallback.
    pub by_port: usize,
}

impl Discovery {
    /// Targets that never answered.
    pub fn unresponsive(&self) -> usize {
        self.total - self.live.len()
    }
}

/// Arguments for a single-echo probe with a two second wait.
fn ping_args(host: &str) -> Vec<String> {
    let args: &[&str] = if cfg!(windows) {
        &["-n", "1", "-w", "2000"]
    } else {
        &["-c", "1", "-W", "2"]
    };
    args.iter()
        .map(|a| (*a).to_owned())
        .chain(std::iter::once(host.to_owned()))
        .collect()
}

/// Detects which expanded targets are live.
pub struct HostDiscoverer {
    store: ResultStore,
    reporter: Arc<dyn Reporter>,
    probe: Arc<dyn ExternalTool>,
    threads: usize,
    fallback_ports: Vec<u16>,
    ping_timeout: Duration,
    connect_timeout: Duration,
}

impl HostDiscoverer {
    /// A discoverer using `probe` for phase 1 and `threads` workers.
    pub fn new(
        store: ResultStore,
        reporter: Arc<dyn Reporter>,
        probe: Arc<dyn ExternalTool>,
        threads: usize,
    ) -> Self {
        Self {
            store,
            reporter,
            probe,
            threads,
            fallback_ports: FALLBACK_PORTS.to_vec(),
            ping_timeout: PING_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the phase 2 port list.
    pub fn with_fallback_ports(mut self, ports: Vec<u16>) -> Self {
        self.fallback_ports = ports;
        self
    }

    /// Overrides the phase 2 connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Probes every distinct target and records live ones with status `up`.
    /// The store's unresponsive count is set when both phases are done.
    pub async fn discover(&self, targets: &[String]) -> Discovery {
        let targets = targets.iter().unique().cloned().collect::<Vec<_>>();
        let targets = targets.as_slice();
        let live = Arc::new(Mutex::new(HashSet::new()));

        self.reporter
            .emit(Event::Notice("Phase 1: Ping discovery...".to_owned()));
        if !self.probe.available() {
            self.reporter.emit(Event::ToolMissing {
                tool: self.probe.name().to_owned(),
                consequence: "relying on port-based discovery".to_owned(),
            });
        } else {
            self.ping_phase(targets, &live).await;
        }

        let silent = {
            let live = live.lock().unwrap_or_else(PoisonError::into_inner);
            targets
                .iter()
                .filter(|host| !live.contains(*host))
                .cloned()
                .collect::<Vec<_>>()
        };
        let by_ping = targets.len() - silent.len();

        if !silent.is_empty() {
            self.reporter.emit(Event::Notice(format!(
                "Phase 2: Port-based discovery for {} non-ping responsive hosts...",
                silent.len()
            )));
            self.port_phase(silent, &live).await;
        }

        let discovery = {
            let live = live.lock().unwrap_or_else(PoisonError::into_inner);
            Discovery {
                live: targets
                    .iter()
                    .filter(|host| live.contains(*host))
                    .cloned()
                    .collect(),
                total: targets.len(),
                by_ping,
                by_port: live.len() - by_ping,
            }
        };

        self.store.set_unresponsive(discovery.unresponsive());
        self.reporter.emit(Event::DiscoverySummary {
            live: discovery.live.len(),
            total: discovery.total,
            by_ping: discovery.by_ping,
            by_port: discovery.by_port,
        });
        discovery
    }

    async fn ping_phase(&self, targets: &[String], live: &Arc<Mutex<HashSet<String>>>) {
        let probe = Arc::clone(&self.probe);
        let store = self.store.clone();
        let reporter = Arc::clone(&self.reporter);
        let live = Arc::clone(live);
        let timeout = self.ping_timeout;

        WorkerPool::new(self.threads)
            .run(targets.to_vec(), move |host| {
                let (probe, store, reporter, live) = (
                    Arc::clone(&probe),
                    store.clone(),
                    Arc::clone(&reporter),
                    Arc::clone(&live),
                );
                async move {
                    match probe.run(&ping_args(&host), timeout).await {
                        Ok(_) => {
                            mark_live(&store, &live, &host);
                            reporter.emit(Event::HostLive {
                                host,
                                via: Liveness::Ping,
                            });
                        }
                        Err(ToolError::Failed { .. }) | Err(ToolError::Timeout { .. }) => {}
                        Err(e) => debug!("Ping probe for {host} errored: {e}"),
                    }
                }
            })
            .await;
    }

    async fn port_phase(&self, silent: Vec<String>, live: &Arc<Mutex<HashSet<String>>>) {
        let ports: Arc<[u16]> = Arc::from(self.fallback_ports.as_slice());
        let store = self.store.clone();
        let reporter = Arc::clone(&self.reporter);
        let live = Arc::clone(live);
        let timeout = self.connect_timeout;

        WorkerPool::new(self.threads)
            .ceiling(LIVENESS_FALLBACK_CEILING)
            .run(silent, move |host| {
                let (ports, store, reporter, live) = (
                    Arc::clone(&ports),
                    store.clone(),
                    Arc::clone(&reporter),
                    Arc::clone(&live),
                );
                async move {
                    for &port in ports.iter() {
                        if connect(&host, port, timeout).await.is_ok() {
                            mark_live(&store, &live, &host);
                            reporter.emit(Event::HostLive {
                                host,
                                via: Liveness::Port,
                            });
                            return;
                        }
                    }
                }
            })
            .await;
    }
}

fn mark_live(store: &ResultStore, live: &Mutex<HashSet<String>>, host: &str) {
    live.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(host.to_owned());
    store.insert_host(host, HostStatus::Up);
}
