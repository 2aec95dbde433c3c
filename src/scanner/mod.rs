//! Built-in TCP-connect port scanner.
use crate::pool::{WorkerPool, PER_HOST_PORT_CEILING};
use crate::store::{PortRecord, ResultStore};
use crate::tui::{Event, Reporter};
use log::debug;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    io::{self, AsyncWriteExt},
    net::TcpStream,
    time,
};

/// Ports probed when no explicit list is given.
pub const COMMON_PORTS: [u16; 21] = [
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 993, 995, 1723, 3306, 3389, 5432, 5900,
    8080, 8443,
];

/// Default wait before a port is declared closed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Opens a TCP connection to `host:port` within `timeout`, then shuts it
/// down. Name resolution counts against the same timeout.
///
/// ```rust
/// # use netdive::scanner::connect;
/// # use std::time::Duration;
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
/// let port = listener.local_addr().unwrap().port();
/// assert!(connect("127.0.0.1", port, Duration::from_secs(1)).await.is_ok());
/// # });
/// ```
pub async fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<()> {
    let tcp_stream = time::timeout(timeout, TcpStream::connect((host, port))).await??;
    debug!("Connection was successful, shutting down stream {host}:{port}");
    if let Err(e) = { tcp_stream }.shutdown().await {
        debug!("Shutdown stream error {}", &e);
    }
    Ok(())
}

/// Scans hosts by plain TCP connect.
///
/// Hosts are spread over `threads` workers; each host then fans its ports
/// out over at most [`PER_HOST_PORT_CEILING`] workers of its own. Each pass
/// replaces the host's port set in the store.
#[derive(Clone)]
pub struct PortScanner {
    store: ResultStore,
    reporter: Arc<dyn Reporter>,
    threads: usize,
    timeout: Duration,
}

impl PortScanner {
    /// A scanner writing into `store`.
    pub fn new(store: ResultStore, reporter: Arc<dyn Reporter>, threads: usize) -> Self {
        Self {
            store,
            reporter,
            threads,
            timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the per-connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scans every host over `ports`. Unreachable hosts simply end up with
    /// an empty port set.
    pub async fn scan(&self, hosts: &[String], ports: &[u16]) {
        debug!(
            "Start scanning hosts. \nThreads {}\nNumber of hosts {}\nNumber of ports {}",
            self.threads,
            hosts.len(),
            ports.len()
        );

        let ports: Arc<[u16]> = Arc::from(ports);
        let scanner = self.clone();
        WorkerPool::new(self.threads)
            .run(hosts.to_vec(), move |host| {
                let scanner = scanner.clone();
                let ports = Arc::clone(&ports);
                async move { scanner.scan_host(host, &ports).await }
            })
            .await;
    }

    /// Probes one host and writes the result as an authoritative replace.
    async fn scan_host(&self, host: String, ports: &[u16]) {
        self.reporter
            .emit(Event::Notice(format!("Scanning {host}...")));

        let open = Arc::new(Mutex::new(Vec::new()));
        let found = Arc::clone(&open);
        let target = Arc::new(host.clone());
        let reporter = Arc::clone(&self.reporter);
        let timeout = self.timeout;

        WorkerPool::new(self.threads)
            .ceiling(PER_HOST_PORT_CEILING)
            .run(ports.to_vec(), move |port| {
                let found = Arc::clone(&found);
                let target = Arc::clone(&target);
                let reporter = Arc::clone(&reporter);
                async move {
                    if connect(&target, port, timeout).await.is_ok() {
                        found
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(PortRecord::open(port));
                        reporter.emit(Event::PortOpen {
                            host: target.to_string(),
                            port,
                        });
                    }
                }
            })
            .await;

        let mut open_ports = std::mem::take(&mut *open.lock().unwrap_or_else(PoisonError::into_inner));
        open_ports.sort_by_key(|p| p.port);
        debug!("Open ports on {host}: {:?}", open_ports.iter().map(|p| p.port).collect::<Vec<_>>());
        self.store.replace_ports(&host, open_ports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ScanInfo, ScanMode};
    use crate::tui::NullReporter;
    use tokio::net::TcpListener;

    fn store() -> ResultStore {
        ResultStore::new(ScanInfo::new(vec!["127.0.0.1".to_owned()], ScanMode::Active))
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn finds_listening_port_and_skips_closed_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;
        let store = store();

        PortScanner::new(store.clone(), Arc::new(NullReporter), 10)
            .with_timeout(Duration::from_millis(500))
            .scan(&["127.0.0.1".to_owned()], &[closed, open])
            .await;

        assert_eq!(store.ports("127.0.0.1").unwrap(), vec![PortRecord::open(open)]);
        drop(listener);
    }

    #[tokio::test]
    async fn host_without_open_ports_gets_empty_set() {
        let closed = closed_port().await;
        let store = store();

        PortScanner::new(store.clone(), Arc::new(NullReporter), 4)
            .with_timeout(Duration::from_millis(500))
            .scan(&["127.0.0.1".to_owned()], &[closed])
            .await;

        assert_eq!(store.ports("127.0.0.1"), Some(vec![]));
    }

    #[tokio::test]
    async fn scan_pass_replaces_previous_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let store = store();
        store.merge_ports("127.0.0.1", vec![PortRecord::open(1)]);

        PortScanner::new(store.clone(), Arc::new(NullReporter), 4)
            .with_timeout(Duration::from_millis(500))
            .scan(&["127.0.0.1".to_owned()], &[open])
            .await;

        assert_eq!(store.ports("127.0.0.1").unwrap(), vec![PortRecord::open(open)]);
    }

    #[tokio::test]
    async fn unresolvable_host_is_not_an_error() {
        assert!(connect("host.invalid", 80, Duration::from_millis(500)).await.is_err());
    }

    #[test]
    fn common_ports_are_unique() {
        let mut ports = COMMON_PORTS.to_vec();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), COMMON_PORTS.len());
    }
}
