//! Provides a means to read, parse and hold configuration options for scans.
use anyhow::Context;
use clap::Parser;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::engine::ReconConfig;
use crate::scanner::COMMON_PORTS;
use crate::store::ScanMode;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Sorted, deduplicated port list.
pub type Ports = Vec<u16>;

/// Parses `80,443,1000-1010` style input.
#[cfg(not(tarpaulin_include))]
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netdive",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Automated network reconnaissance: passive enumeration, host discovery,
/// port scanning and service identification.
/// WARNING For authorized security testing only.
pub struct Opts {
    /// A comma-delimited list of IPs, CIDRs or hostnames to be scanned.
    #[arg(short, long, value_delimiter = ',', conflicts_with = "file", required_unless_present = "file")]
    pub targets: Vec<String>,

    /// A newline-delimited file of targets. Blank lines and '#' comments are skipped.
    #[arg(short, long, value_parser)]
    pub file: Option<PathBuf>,

    /// Directory the JSON report is written to.
    #[arg(short, long, default_value = "recon_output")]
    pub output: PathBuf,

    /// Number of concurrent workers.
    #[arg(short = 'T', long, default_value = "50")]
    pub threads: usize,

    /// Discovery mode.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "active")]
    pub mode: ScanMode,

    /// Ports probed by the built-in scanner when masscan is unavailable. Examples: 80,443,8080 or 1-1000
    #[arg(short, long, value_parser = parse_ports_and_ranges)]
    pub ports: Option<Ports>,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Greppable mode. Only output the open ports per host.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Skip the authorization prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    /// Parses the process arguments.
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merge values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(output, threads, mode, greppable, accessible);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        // Targets given on the command line always win.
        if self.targets.is_empty() && self.file.is_none() {
            if let Some(targets) = &config.targets {
                self.targets = targets.clone();
            }
        }

        merge_optional!(ports, resolver, ulimit);
    }

    /// Engine configuration for the given (already loaded) targets.
    pub fn recon_config(&self, targets: Vec<String>) -> ReconConfig {
        ReconConfig {
            targets,
            threads: self.threads.max(1),
            mode: self.mode,
            ports: self.ports.clone().unwrap_or_else(|| COMMON_PORTS.to_vec()),
            resolver: self.resolver.clone(),
            ..ReconConfig::default()
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            targets: vec![],
            file: None,
            output: PathBuf::from("recon_output"),
            threads: 50,
            mode: ScanMode::Active,
            ports: None,
            resolver: None,
            ulimit: None,
            greppable: false,
            accessible: false,
            no_config: true,
            config_path: None,
            yes: false,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    targets: Option<Vec<String>>,
    output: Option<PathBuf>,
    threads: Option<usize>,
    mode: Option<ScanMode>,
    ports: Option<Vec<u16>>,
    resolver: Option<String>,
    ulimit: Option<u64>,
    greppable: Option<bool>,
    accessible: Option<bool>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// targets = ["10.0.0.0/24", "example.com"]
    /// threads = 100
    /// mode = "active"
    /// ports = [80, 443, 8080]
    /// greppable = true
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("could not read {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("invalid configuration file {}", config_path.display()))
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let mut config_path = dirs::home_dir().unwrap_or_default();
    config_path.push(".netdive.toml");
    config_path
}
