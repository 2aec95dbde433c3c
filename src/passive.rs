//! Passive subdomain enumeration through amass.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::address::extract_domain;
use crate::store::{HostStatus, ResultStore};
use crate::tool::ExternalTool;
use crate::tui::{Event, Reporter};

/// Hard limit on one amass run.
pub const PASSIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Non-empty trimmed lines of amass output.
pub fn parse_hostnames(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Feeds hostnames from an external enumerator into the store with status
/// `discovered`.
pub struct PassiveSourceAdapter {
    tool: Arc<dyn ExternalTool>,
    store: ResultStore,
    reporter: Arc<dyn Reporter>,
    timeout: Duration,
}

impl PassiveSourceAdapter {
    /// An adapter driving `tool`.
    pub fn new(tool: Arc<dyn ExternalTool>, store: ResultStore, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            tool,
            store,
            reporter,
            timeout: PASSIVE_TIMEOUT,
        }
    }

    /// Enumerates every domain-like target. Returns the deduplicated hosts
    /// found, in discovery order. A missing or failing tool contributes
    /// nothing.
    pub async fn discover(&self, targets: &[String]) -> Vec<String> {
        let domains = targets
            .iter()
            .filter_map(|t| extract_domain(t))
            .collect::<Vec<_>>();
        if domains.is_empty() {
            return Vec::new();
        }

        if !self.tool.available() {
            self.reporter.emit(Event::ToolMissing {
                tool: self.tool.name().to_owned(),
                consequence: "skipping passive discovery".to_owned(),
            });
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut discovered = Vec::new();
        for domain in domains {
            self.reporter.emit(Event::Notice(format!(
                "Performing passive discovery on domain: {domain}"
            )));
            for host in self.enumerate(&domain).await {
                if seen.insert(host.clone()) {
                    discovered.push(host);
                }
            }
        }

        for host in &discovered {
            self.store.insert_host(host, HostStatus::Discovered);
        }
        self.reporter.emit(Event::Notice(format!(
            "Passive discovery completed. Found {} hosts.",
            discovered.len()
        )));
        discovered
    }

    async fn enumerate(&self, domain: &str) -> Vec<String> {
        let args = ["enum", "-d", domain, "-passive"].map(str::to_owned);
        let output = match self.tool.run(&args, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                self.reporter.emit(Event::ToolFailed {
                    tool: self.tool.name().to_owned(),
                    error: e.to_string(),
                });
                return Vec::new();
            }
        };

        let hosts = parse_hostnames(&output.stdout);
        if hosts.is_empty() {
            self.reporter.emit(Event::Notice(format!(
                "{} completed but found no subdomains for {domain}",
                self.tool.name()
            )));
        }
        for host in &hosts {
            self.reporter.emit(Event::PassiveHost {
                domain: domain.to_owned(),
                host: host.clone(),
            });
        }
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ScanInfo, ScanMode};
    use crate::tool::fake::CannedTool;
    use crate::tui::{NullReporter, RecordingReporter};

    fn store() -> ResultStore {
        ResultStore::new(ScanInfo::new(vec![], ScanMode::Passive))
    }

    fn targets(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn hostnames_are_trimmed_lines() {
        assert_eq!(
            parse_hostnames("  www.example.com \n\n api.example.com\n"),
            targets(&["www.example.com", "api.example.com"])
        );
    }

    #[tokio::test]
    async fn discovered_hosts_are_deduped_and_stored() {
        let store = store();
        store.insert_host("www.example.com", crate::store::HostStatus::Up);
        let tool = Arc::new(CannedTool::new("amass", |args| {
            Ok(match args[2].as_str() {
                "example.com" => "www.example.com\napi.example.com\n".to_owned(),
                _ => "api.example.com\nmail.example.org\n".to_owned(),
            })
        }));

        let found = PassiveSourceAdapter::new(tool.clone(), store.clone(), Arc::new(NullReporter))
            .discover(&targets(&["Example.com", "10.0.0.0/24", "example.org"]))
            .await;

        assert_eq!(
            found,
            targets(&["www.example.com", "api.example.com", "mail.example.org"])
        );
        assert_eq!(tool.call_count(), 2);
        assert_eq!(tool.calls.lock().unwrap()[0], targets(&["enum", "-d", "example.com", "-passive"]));
        assert_eq!(store.len(), 3);
        assert_eq!(store.status("www.example.com"), Some(HostStatus::Up));
        assert_eq!(store.status("mail.example.org"), Some(HostStatus::Discovered));
    }

    #[tokio::test]
    async fn ip_only_targets_never_invoke_the_tool() {
        let tool = Arc::new(CannedTool::stdout("amass", "x.example.com"));
        let found = PassiveSourceAdapter::new(tool.clone(), store(), Arc::new(NullReporter))
            .discover(&targets(&["10.0.0.1", "192.168.0.0/30"]))
            .await;

        assert!(found.is_empty());
        assert_eq!(tool.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_a_soft_failure() {
        let reporter = Arc::new(RecordingReporter::default());
        let tool = Arc::new(CannedTool::missing("amass"));

        let found = PassiveSourceAdapter::new(tool.clone(), store(), reporter.clone())
            .discover(&targets(&["example.com", "example.org"]))
            .await;

        assert!(found.is_empty());
        assert_eq!(tool.call_count(), 0);
        let missing = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::ToolMissing { .. }))
            .count();
        assert_eq!(missing, 1);
    }

    #[tokio::test]
    async fn failing_tool_contributes_nothing() {
        let store = store();
        let reporter = Arc::new(RecordingReporter::default());
        let found = PassiveSourceAdapter::new(
            Arc::new(CannedTool::failing("amass")),
            store.clone(),
            reporter.clone(),
        )
        .discover(&targets(&["example.com"]))
        .await;

        assert!(found.is_empty());
        assert!(store.is_empty());
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, Event::ToolFailed { .. })));
    }
}
