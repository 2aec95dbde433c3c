//! Operator-facing output.
//!
//! Components never print. They emit [`Event`]s into an injected
//! [`Reporter`]; the binary renders them with [`ConsoleReporter`].
use colored::Colorize;
use log::debug;

/// How a host was confirmed live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Answered the reachability probe.
    Ping,
    /// Accepted a TCP connect on a fallback port.
    Port,
}

/// Something worth telling the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A pipeline phase begins.
    Phase(String),
    /// Targets dropped by validation.
    InvalidTargets(Vec<String>),
    /// A host was confirmed live.
    HostLive {
        /// Host identifier.
        host: String,
        /// Which probe confirmed it.
        via: Liveness,
    },
    /// Host discovery finished.
    DiscoverySummary {
        /// Live hosts.
        live: usize,
        /// Expanded targets probed.
        total: usize,
        /// Live through the reachability probe.
        by_ping: usize,
        /// Live through the TCP fallback.
        by_port: usize,
    },
    /// An open port was found.
    PortOpen {
        /// Host identifier.
        host: String,
        /// Open port.
        port: u16,
    },
    /// A service label was assigned.
    ServiceIdentified {
        /// Host identifier.
        host: String,
        /// Port.
        port: u16,
        /// Label, possibly with a server banner.
        service: String,
    },
    /// Passive enumeration returned a hostname.
    PassiveHost {
        /// Domain that was enumerated.
        domain: String,
        /// Hostname found.
        host: String,
    },
    /// An optional external program is not installed.
    ToolMissing {
        /// Program name.
        tool: String,
        /// What the engine does instead.
        consequence: String,
    },
    /// An external program ran but failed.
    ToolFailed {
        /// Program name.
        tool: String,
        /// Error description.
        error: String,
    },
    /// Anything else.
    Notice(String),
}

/// Receives events from every component. Must be callable from many workers.
pub trait Reporter: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: Event);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn emit(&self, event: Event) {
        debug!("{event:?}");
    }
}

/// Prints events to stdout.
///
/// `greppable` silences all progress output. `accessible` drops colour.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
    greppable: bool,
    accessible: bool,
}

impl ConsoleReporter {
    /// A console reporter with the given output modes.
    pub fn new(greppable: bool, accessible: bool) -> Self {
        Self {
            greppable,
            accessible,
        }
    }

    fn paint(&self, line: String, color: &str) -> String {
        if self.accessible {
            line
        } else {
            line.color(color).to_string()
        }
    }

    /// The line an event renders to, before colouring.
    pub fn render(event: &Event) -> (String, &'static str) {
        match event {
            Event::Phase(name) => (format!("\n[+] {name}"), "yellow"),
            Event::InvalidTargets(targets) => {
                (format!("[-] Invalid targets: {}", targets.join(", ")), "red")
            }
            Event::HostLive { host, via } => {
                let via = match via {
                    Liveness::Ping => "ping",
                    Liveness::Port => "port",
                };
                (format!("[+] Host discovered ({via}): {host}"), "green")
            }
            Event::DiscoverySummary {
                live,
                total,
                by_ping,
                by_port,
            } => (
                format!(
                    "[*] Host discovery completed. Found {live} live hosts from {total} total hosts.\n[*] Ping responsive: {by_ping}, Port responsive: {by_port}"
                ),
                "cyan",
            ),
            Event::PortOpen { host, port } => {
                (format!("[+] Open port found: {host}:{port}"), "green")
            }
            Event::ServiceIdentified {
                host,
                port,
                service,
            } => (
                format!("[+] Service identified: {host}:{port} -> {service}"),
                "green",
            ),
            Event::PassiveHost { domain, host } => {
                (format!("[+] Passive discovery ({domain}): {host}"), "green")
            }
            Event::ToolMissing { tool, consequence } => (
                format!("[-] {tool} not found in PATH, {consequence}"),
                "red",
            ),
            Event::ToolFailed { tool, error } => (format!("[-] {tool} failed: {error}"), "red"),
            Event::Notice(message) => (format!("[*] {message}"), "cyan"),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn emit(&self, event: Event) {
        debug!("{event:?}");
        if self.greppable {
            return;
        }
        let (line, color) = Self::render(&event);
        println!("{}", self.paint(line, color));
    }
}

/// Collects events so tests can assert on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    pub(crate) events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_host_and_service_lines() {
        let (line, color) = ConsoleReporter::render(&Event::HostLive {
            host: "10.0.0.5".to_owned(),
            via: Liveness::Port,
        });
        assert_eq!(line, "[+] Host discovered (port): 10.0.0.5");
        assert_eq!(color, "green");

        let (line, _) = ConsoleReporter::render(&Event::ServiceIdentified {
            host: "10.0.0.5".to_owned(),
            port: 80,
            service: "http (nginx)".to_owned(),
        });
        assert_eq!(line, "[+] Service identified: 10.0.0.5:80 -> http (nginx)");
    }

    #[test]
    fn accessible_mode_has_no_escape_codes() {
        let reporter = ConsoleReporter::new(false, true);
        let painted = reporter.paint("[-] masscan failed".to_owned(), "red");
        assert_eq!(painted, "[-] masscan failed");
    }
}
