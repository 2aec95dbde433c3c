//! masscan integration with automatic fallback to the built-in scanner.
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tempfile::Builder;

use crate::scanner::{PortScanner, COMMON_PORTS};
use crate::store::{PortRecord, ResultStore};
use crate::tool::{ExternalTool, ToolError};
use crate::tui::{Event, Reporter};

/// Hard limit on one masscan run.
pub const FAST_SCAN_TIMEOUT: Duration = Duration::from_secs(300);

/// Packets per second handed to masscan.
pub const FAST_SCAN_RATE: u32 = 1000;

/// Open ports per host.
pub type PortMap = HashMap<String, Vec<PortRecord>>;

/// Parses masscan `--output-format list` output.
///
/// Only `open tcp <port> <host> ...` lines count; comments, other states,
/// other protocols and malformed lines are skipped. Ports are unique per host.
///
/// ```rust
/// # use netdive::fastscan::parse_list_output;
/// let found = parse_list_output("open tcp 80 10.0.0.5 169000000\nclosed tcp 81 10.0.0.5 1\n");
/// assert_eq!(found["10.0.0.5"].len(), 1);
/// assert_eq!(found["10.0.0.5"][0].port, 80);
/// ```
pub fn parse_list_output(output: &str) -> PortMap {
    let mut found = PortMap::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line.split_whitespace().collect::<Vec<_>>();
        let [state, protocol, port, host, ..] = fields.as_slice() else {
            continue;
        };
        if *state != "open" || *protocol != "tcp" {
            continue;
        }
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        if port == 0 {
            continue;
        }

        let ports = found.entry((*host).to_owned()).or_default();
        if !ports.iter().any(|p| p.port == port) {
            ports.push(PortRecord::open(port));
        }
    }
    found
}

/// Runs masscan across the live host list, or the built-in scanner when
/// masscan is missing or fails.
pub struct FastScanAdapter {
    tool: Arc<dyn ExternalTool>,
    fallback: PortScanner,
    fallback_ports: Vec<u16>,
    store: ResultStore,
    reporter: Arc<dyn Reporter>,
    timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl FastScanAdapter {
    /// An adapter driving `tool`, falling back to `fallback` over
    /// [`COMMON_PORTS`].
    pub fn new(
        tool: Arc<dyn ExternalTool>,
        fallback: PortScanner,
        store: ResultStore,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            tool,
            fallback,
            fallback_ports: COMMON_PORTS.to_vec(),
            store,
            reporter,
            timeout: FAST_SCAN_TIMEOUT,
            temp_dir: None,
        }
    }

    /// Writes the masscan target file under `dir` instead of the system
    /// temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Overrides the port list used by the fallback scanner.
    pub fn with_fallback_ports(mut self, ports: Vec<u16>) -> Self {
        self.fallback_ports = ports;
        self
    }

    /// Scans `hosts` and merges findings into the store.
    pub async fn scan(&self, hosts: &[String]) -> PortMap {
        if hosts.is_empty() {
            self.reporter
                .emit(Event::Notice("No hosts provided for masscan".to_owned()));
            return PortMap::new();
        }

        if !self.tool.available() {
            self.reporter.emit(Event::ToolMissing {
                tool: self.tool.name().to_owned(),
                consequence: "falling back to basic port scan".to_owned(),
            });
            return self.fall_back(hosts).await;
        }

        let output = match self.run_tool(hosts).await {
            Ok(output) => output,
            Err(error) => {
                self.reporter.emit(Event::ToolFailed {
                    tool: self.tool.name().to_owned(),
                    error: error.to_string(),
                });
                self.reporter
                    .emit(Event::Notice("Falling back to basic port scan...".to_owned()));
                return self.fall_back(hosts).await;
            }
        };

        let found = parse_list_output(&output);
        for (host, ports) in &found {
            for port in ports {
                self.reporter.emit(Event::PortOpen {
                    host: host.clone(),
                    port: port.port,
                });
            }
        }
        self.reporter.emit(Event::Notice(format!(
            "Masscan completed. Found ports on {} hosts.",
            found.len()
        )));

        for host in hosts {
            let ports = found.get(host).cloned().unwrap_or_default();
            self.store.merge_ports(host, ports);
        }
        for (host, ports) in &found {
            if !hosts.contains(host) {
                self.store.merge_ports(host, ports.clone());
            }
        }
        found
    }

    /// Writes the target file and runs masscan. The file is removed when
    /// this returns, whatever the outcome.
    async fn run_tool(&self, hosts: &[String]) -> Result<String, ToolError> {
        let input_error = |source: io::Error| ToolError::InputFile {
            tool: self.tool.name().to_owned(),
            source,
        };

        let mut builder = Builder::new();
        builder.prefix("masscan_targets_").suffix(".txt");
        let mut targets = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(input_error)?;
        for host in hosts {
            writeln!(targets, "{host}").map_err(input_error)?;
        }
        targets.flush().map_err(input_error)?;

        let args = vec![
            "-iL".to_owned(),
            targets.path().display().to_string(),
            "-p1-65535".to_owned(),
            "--rate".to_owned(),
            FAST_SCAN_RATE.to_string(),
            "--output-format".to_owned(),
            "list".to_owned(),
        ];
        self.reporter
            .emit(Event::Notice(format!("Running masscan on {} hosts...", hosts.len())));

        let output = self.tool.run(&args, self.timeout).await?;
        debug!("masscan wrote {} bytes", output.stdout.len());
        Ok(output.stdout)
    }

    async fn fall_back(&self, hosts: &[String]) -> PortMap {
        self.fallback.scan(hosts, &self.fallback_ports).await;
        self.store.open_ports_for(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HostStatus, ScanInfo, ScanMode};
    use crate::tool::fake::CannedTool;
    use crate::tui::{NullReporter, RecordingReporter};
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    fn store() -> ResultStore {
        ResultStore::new(ScanInfo::new(vec![], ScanMode::Active))
    }

    fn adapter(tool: Arc<dyn ExternalTool>, store: &ResultStore) -> FastScanAdapter {
        let scanner = PortScanner::new(store.clone(), Arc::new(NullReporter), 4)
            .with_timeout(Duration::from_millis(500));
        FastScanAdapter::new(tool, scanner, store.clone(), Arc::new(NullReporter))
    }

    fn hosts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parser_keeps_only_open_tcp_lines() {
        let found = parse_list_output(
            "#masscan\n\
             open tcp 80 10.0.0.5 169000000\n\
             closed tcp 81 10.0.0.5 169000000\n\
             open udp 53 10.0.0.5 169000000\n\
             open tcp notaport 10.0.0.5 1\n\
             open tcp 0 10.0.0.5 1\n\
             open tcp 99999 10.0.0.5 1\n\
             open tcp\n\
             garbage\n\
             open tcp 443 10.0.0.6 169000001\n\
             open tcp 80 10.0.0.5 169000002\n\
             # end\n",
        );

        assert_eq!(found.len(), 2);
        assert_eq!(found["10.0.0.5"], vec![PortRecord::open(80)]);
        assert_eq!(found["10.0.0.6"], vec![PortRecord::open(443)]);
    }

    #[tokio::test]
    async fn masscan_output_is_parsed_and_merged() {
        let store = store();
        store.merge_ports("10.0.0.5", vec![PortRecord::open(22)]);
        let tool = Arc::new(CannedTool::stdout(
            "masscan",
            "open tcp 80 10.0.0.5 169000000\nclosed tcp 81 10.0.0.5 169000000\n",
        ));

        let found = adapter(tool.clone(), &store)
            .scan(&hosts(&["10.0.0.5", "10.0.0.6"]))
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found["10.0.0.5"], vec![PortRecord::open(80)]);
        let ports: Vec<u16> = store.ports("10.0.0.5").unwrap().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![22, 80]);
        assert_eq!(store.status("10.0.0.6"), Some(HostStatus::Up));
        assert_eq!(store.ports("10.0.0.6"), Some(vec![]));
        assert_eq!(tool.call_count(), 1);
    }

    #[tokio::test]
    async fn target_file_exists_during_run_and_is_removed_after() {
        let store = store();
        let seen = Arc::new(std::sync::Mutex::new(None::<(PathBuf, String)>));
        let record = Arc::clone(&seen);
        let tool = Arc::new(CannedTool::new("masscan", move |args| {
            let path = PathBuf::from(&args[1]);
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            *record.lock().unwrap() = Some((path, content));
            Ok(String::new())
        }));

        adapter(tool.clone(), &store)
            .scan(&hosts(&["10.0.0.1", "10.0.0.2"]))
            .await;

        let (path, content) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(content, "10.0.0.1\n10.0.0.2\n");
        assert!(!path.exists());

        let args = &tool.calls.lock().unwrap()[0];
        assert_eq!(args[0], "-iL");
        assert!(args.contains(&"-p1-65535".to_owned()));
        assert!(args.contains(&"list".to_owned()));
    }

    #[tokio::test]
    async fn empty_host_list_spawns_nothing() {
        let tool = Arc::new(CannedTool::stdout("masscan", "open tcp 80 10.0.0.5 1"));
        let found = adapter(tool.clone(), &store()).scan(&[]).await;

        assert!(found.is_empty());
        assert_eq!(tool.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_masscan_falls_back_to_builtin_scanner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let store = store();
        let reporter = Arc::new(RecordingReporter::default());
        let tool = Arc::new(CannedTool::missing("masscan"));
        let scanner = PortScanner::new(store.clone(), Arc::new(NullReporter), 4)
            .with_timeout(Duration::from_millis(500));

        let found = FastScanAdapter::new(tool.clone(), scanner, store.clone(), reporter.clone())
            .with_fallback_ports(vec![open])
            .scan(&hosts(&["127.0.0.1"]))
            .await;

        assert_eq!(found["127.0.0.1"], vec![PortRecord::open(open)]);
        assert_eq!(tool.call_count(), 0);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, Event::ToolMissing { tool, .. } if tool == "masscan")));
    }

    #[tokio::test]
    async fn failing_masscan_falls_back_instead_of_returning_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let store = store();
        let tool = Arc::new(CannedTool::new("masscan", |_| {
            Err(ToolError::Timeout {
                tool: "masscan".to_owned(),
                after: FAST_SCAN_TIMEOUT,
            })
        }));

        let found = adapter(tool.clone(), &store)
            .with_fallback_ports(vec![open])
            .scan(&hosts(&["127.0.0.1"]))
            .await;

        assert_eq!(tool.call_count(), 1);
        assert_eq!(found["127.0.0.1"], vec![PortRecord::open(open)]);
        assert_eq!(store.ports("127.0.0.1").unwrap(), vec![PortRecord::open(open)]);
    }

    #[tokio::test]
    async fn tool_errors_come_back_typed() {
        let store = store();
        let failing = adapter(Arc::new(CannedTool::failing("masscan")), &store);
        assert!(matches!(
            failing.run_tool(&hosts(&["10.0.0.1"])).await,
            Err(ToolError::Failed { code: Some(1), .. })
        ));

        let tool = Arc::new(CannedTool::stdout("masscan", "open tcp 80 10.0.0.1 1"));
        let unwritable = adapter(tool.clone(), &store).with_temp_dir("/nonexistent/netdive");
        assert!(matches!(
            unwritable.run_tool(&hosts(&["10.0.0.1"])).await,
            Err(ToolError::InputFile { .. })
        ));
        assert_eq!(tool.call_count(), 0);
    }

    #[tokio::test]
    async fn unwritable_target_file_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let store = store();
        let reporter = Arc::new(RecordingReporter::default());
        let scanner = PortScanner::new(store.clone(), Arc::new(NullReporter), 4)
            .with_timeout(Duration::from_millis(500));

        let found = FastScanAdapter::new(
            Arc::new(CannedTool::stdout("masscan", "")),
            scanner,
            store.clone(),
            reporter.clone(),
        )
        .with_temp_dir("/nonexistent/netdive")
        .with_fallback_ports(vec![open])
        .scan(&hosts(&["127.0.0.1"]))
        .await;

        assert_eq!(found["127.0.0.1"], vec![PortRecord::open(open)]);
        assert!(reporter.events().iter().any(|e| matches!(
            e,
            Event::ToolFailed { error, .. } if error.starts_with("failed to prepare input file for masscan")
        )));
    }
}
