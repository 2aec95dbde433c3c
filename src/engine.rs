//! Wires the components into the active and passive pipelines.
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::address::{expand_targets, get_resolver, validate_targets};
use crate::discovery::{HostDiscoverer, FALLBACK_PORTS};
use crate::fastscan::FastScanAdapter;
use crate::passive::PassiveSourceAdapter;
use crate::scanner::{PortScanner, COMMON_PORTS};
use crate::service::{BannerProbe, HttpBanner, ServiceIdentifier, BANNER_TIMEOUT};
use crate::store::{HostStatus, ResultStore, ScanInfo, ScanMode, ScanState};
use crate::tool::{ExternalTool, SystemTool};
use crate::tui::{Event, Reporter};

/// Conditions that end a run before it produces results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// Every target failed validation.
    #[error("No valid targets found")]
    NoValidTargets {
        /// The rejected targets.
        invalid: Vec<String>,
    },
    /// Neither discovery phase produced a host.
    #[error("No hosts discovered")]
    NoHostsDiscovered,
}

/// What a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconConfig {
    /// Raw targets: IPs, CIDR blocks, hostnames.
    pub targets: Vec<String>,
    /// Global worker count.
    pub threads: usize,
    /// Pipeline to run.
    pub mode: ScanMode,
    /// Ports for the built-in scanner when masscan is unusable.
    pub ports: Vec<u16>,
    /// Ports tried when a host ignores the reachability probe.
    pub discovery_ports: Vec<u16>,
    /// Resolver override, as accepted by [`get_resolver`].
    pub resolver: Option<String>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            threads: 50,
            mode: ScanMode::Active,
            ports: COMMON_PORTS.to_vec(),
            discovery_ports: FALLBACK_PORTS.to_vec(),
            resolver: None,
        }
    }
}

/// The external collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    /// Reachability probe for host discovery phase 1.
    pub ping: Arc<dyn ExternalTool>,
    /// Passive subdomain enumerator.
    pub passive: Arc<dyn ExternalTool>,
    /// Fast port scanner.
    pub fast_scanner: Arc<dyn ExternalTool>,
    /// HTTP server banner reader.
    pub banner: Arc<dyn BannerProbe>,
}

impl Collaborators {
    /// `ping`, `amass` and `masscan` from `PATH`, and a reqwest banner client.
    pub fn system() -> reqwest::Result<Self> {
        Ok(Self {
            ping: Arc::new(SystemTool::new("ping")),
            passive: Arc::new(SystemTool::new("amass")),
            fast_scanner: Arc::new(SystemTool::new("masscan")),
            banner: Arc::new(HttpBanner::new(BANNER_TIMEOUT)?),
        })
    }
}

/// One reconnaissance run.
pub struct Recon {
    config: ReconConfig,
    tools: Collaborators,
    reporter: Arc<dyn Reporter>,
}

impl Recon {
    /// A run over `config` using `tools`, reporting to `reporter`.
    pub fn new(config: ReconConfig, tools: Collaborators, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            tools,
            reporter,
        }
    }

    /// Executes the configured pipeline and returns the final state.
    pub async fn run(&self) -> Result<ScanState, ReconError> {
        let resolver = get_resolver(&self.config.resolver).await;
        let validated = validate_targets(&self.config.targets, &resolver).await;
        if !validated.invalid.is_empty() {
            self.reporter
                .emit(Event::InvalidTargets(validated.invalid.clone()));
        }
        if validated.valid.is_empty() {
            return Err(ReconError::NoValidTargets {
                invalid: validated.invalid,
            });
        }

        let store = ResultStore::new(ScanInfo::new(validated.valid.clone(), self.config.mode));
        match self.config.mode {
            ScanMode::Passive => self.run_passive(&validated.valid, &store).await?,
            ScanMode::Active => self.run_active(&validated.valid, &store).await?,
        }
        Ok(store.snapshot())
    }

    fn passive(&self, store: &ResultStore) -> PassiveSourceAdapter {
        PassiveSourceAdapter::new(
            Arc::clone(&self.tools.passive),
            store.clone(),
            Arc::clone(&self.reporter),
        )
    }

    async fn run_passive(&self, targets: &[String], store: &ResultStore) -> Result<(), ReconError> {
        self.phase("Starting Passive Discovery...");
        let discovered = self.passive(store).discover(targets).await;
        if discovered.is_empty() {
            return Err(ReconError::NoHostsDiscovered);
        }
        Ok(())
    }

    async fn run_active(&self, targets: &[String], store: &ResultStore) -> Result<(), ReconError> {
        let threads = self.config.threads;

        self.phase("Phase 1: Passive subdomain discovery");
        let passive_hosts = self.passive(store).discover(targets).await;

        self.phase("Phase 2: Host discovery and connectivity check");
        let expanded = expand_targets(targets);
        debug!("Expanded {} targets into {} hosts", targets.len(), expanded.len());
        let discovery = HostDiscoverer::new(
            store.clone(),
            Arc::clone(&self.reporter),
            Arc::clone(&self.tools.ping),
            threads,
        )
        .with_fallback_ports(self.config.discovery_ports.clone())
        .discover(&expanded)
        .await;

        let hosts = passive_hosts
            .into_iter()
            .chain(discovery.live)
            .unique()
            .collect::<Vec<_>>();
        if hosts.is_empty() {
            return Err(ReconError::NoHostsDiscovered);
        }
        for host in &hosts {
            store.insert_host(host, HostStatus::Up);
        }

        self.phase("Phase 3: Fast port scanning with masscan");
        let scanner = PortScanner::new(store.clone(), Arc::clone(&self.reporter), threads);
        let found = FastScanAdapter::new(
            Arc::clone(&self.tools.fast_scanner),
            scanner,
            store.clone(),
            Arc::clone(&self.reporter),
        )
        .with_fallback_ports(self.config.ports.clone())
        .scan(&hosts)
        .await;

        if !found.is_empty() {
            self.phase("Phase 4: Basic service identification");
            // masscan may report hosts outside the list; they get labels too.
            let labelled = hosts
                .iter()
                .cloned()
                .chain(found.into_keys().sorted())
                .unique()
                .collect::<Vec<_>>();
            ServiceIdentifier::new(
                store.clone(),
                Arc::clone(&self.reporter),
                Arc::clone(&self.tools.banner),
                threads,
            )
            .identify(&labelled)
            .await;
        }
        Ok(())
    }

    fn phase(&self, name: &str) {
        self.reporter.emit(Event::Phase(name.to_owned()));
    }
}
