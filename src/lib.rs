//! This crate exposes the internal functionality of the netdive
//! reconnaissance engine.
//!
//! netdive takes a list of IPs, CIDR blocks and hostnames and works out which
//! hosts are alive, which TCP ports they expose, and what is listening on them.
//! It leans on `masscan` for fast port sweeps and on `amass` for passive
//! subdomain enumeration, and falls back to its own connect scanner when those
//! tools are missing or fail.
//!
//! ## Architecture Overview
//!
//! A run is driven by [`Recon`](crate::engine::Recon). In active mode it goes
//! through these phases:
//!
//! 1. **Validation**: targets are checked and expanded by [`address`]
//! 2. **Passive discovery**: domain targets are enumerated by
//!    [`PassiveSourceAdapter`](crate::passive::PassiveSourceAdapter)
//! 3. **Host discovery**: a ping sweep, then a TCP connect fallback, by
//!    [`HostDiscoverer`](crate::discovery::HostDiscoverer)
//! 4. **Port scanning**: masscan through
//!    [`FastScanAdapter`](crate::fastscan::FastScanAdapter), or the built-in
//!    [`PortScanner`](crate::scanner::PortScanner)
//! 5. **Service identification**: port labels and HTTP `Server` banners, by
//!    [`ServiceIdentifier`](crate::service::ServiceIdentifier)
//!
//! Every phase writes into one shared [`ResultStore`](crate::store::ResultStore)
//! and reports progress through an injected [`Reporter`](crate::tui::Reporter).
//! Bounded concurrency comes from [`WorkerPool`](crate::pool::WorkerPool).
//!
//! Passive mode stops after step 2 and records every host as `discovered`.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use netdive::engine::{Collaborators, Recon, ReconConfig};
//! use netdive::tui::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReconConfig {
//!         targets: vec!["192.168.1.0/28".to_owned(), "example.com".to_owned()],
//!         threads: 100,
//!         ..ReconConfig::default()
//!     };
//!     let reporter = Arc::new(ConsoleReporter::new(false, false));
//!
//!     let state = Recon::new(config, Collaborators::system()?, reporter)
//!         .run()
//!         .await?;
//!
//!     for host in state.sorted_hosts() {
//!         println!("{} has {} open ports", host.host, host.ports.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only two conditions end a run early, both reported as
//! [`ReconError`](crate::engine::ReconError): no target survives validation,
//! or no host is discovered. Missing or failing external tools are reported
//! and routed around.
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod address;

pub mod store;

pub mod pool;

pub mod tool;

pub mod discovery;

pub mod scanner;

pub mod fastscan;

pub mod service;

pub mod passive;

pub mod engine;

pub mod report;
