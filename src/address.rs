//! Provides functions to validate and expand targets: IPs, CIDRs or hostnames.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use cidr_utils::cidr::{IpCidr, IpInet};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use tokio::{fs, io};

/// Outcome of [`validate_targets`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Validated {
    /// Targets that parse as an IP or CIDR, or resolve as a hostname.
    pub valid: Vec<String>,
    /// Everything else, in input order.
    pub invalid: Vec<String>,
}

/// Splits targets into valid and invalid ones.
///
/// A target is valid when it is a CIDR block (IPv6 blocks no wider than a
/// /112), a bare IP address, or a
/// hostname that resolves through the system resolver or, failing that, the
/// backup resolver.
pub async fn validate_targets(targets: &[String], resolver: &TokioAsyncResolver) -> Validated {
    let mut validated = Validated::default();
    for target in targets {
        if is_valid_target(target, resolver).await {
            validated.valid.push(target.clone());
        } else {
            validated.invalid.push(target.clone());
        }
    }
    validated
}

async fn is_valid_target(target: &str, resolver: &TokioAsyncResolver) -> bool {
    if target.contains('/') {
        return parse_cidr(target).is_some_and(|cidr| expandable(&cidr));
    }
    if IpAddr::from_str(target).is_ok() {
        return true;
    }
    if !looks_like_hostname(target) {
        return false;
    }

    if let Ok(mut addrs) = tokio::net::lookup_host((target, 0)).await {
        if addrs.next().is_some() {
            return true;
        }
    }
    resolver
        .lookup_ip(target)
        .await
        .map(|lookup| lookup.iter().next().is_some())
        .unwrap_or(false)
}

/// Cheap syntactic check so obviously broken input never hits DNS.
fn looks_like_hostname(target: &str) -> bool {
    !target.is_empty()
        && target.len() <= 253
        && target.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Shortest IPv6 prefix accepted as a target; a /112 holds 65,536 addresses.
pub const MIN_IPV6_PREFIX: u8 = 112;

/// IPv4 blocks of any size expand; IPv6 blocks only up to [`MIN_IPV6_PREFIX`].
fn expandable(cidr: &IpCidr) -> bool {
    !cidr.is_ipv6() || cidr.network_length() >= MIN_IPV6_PREFIX
}

/// Parses `10.0.0.7/24` style input into the network it belongs to. Host
/// bits are masked off rather than rejected.
fn parse_cidr(target: &str) -> Option<IpCidr> {
    IpInet::from_str(target).ok().map(|inet| inet.network())
}

/// Expands targets into a flat, deduplicated list of scan units.
///
/// CIDR blocks yield every address they mask, network and broadcast
/// included, in ascending order. Everything else passes through unchanged.
/// The first occurrence of a unit wins.
///
/// ```rust
/// # use netdive::address::expand_targets;
/// let hosts = expand_targets(&["192.168.0.1".to_owned(), "192.168.0.0/30".to_owned()]);
/// assert_eq!(hosts, ["192.168.0.1", "192.168.0.0", "192.168.0.2", "192.168.0.3"]);
/// ```
pub fn expand_targets(targets: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .flat_map(|target| match parse_cidr(target).filter(|_| target.contains('/')) {
            Some(cidr) => cidr.iter().map(|c| c.address().to_string()).collect_vec(),
            None => vec![target.clone()],
        })
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

/// Domain to hand to passive enumeration, or `None` for IP and CIDR targets.
pub fn extract_domain(target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() || IpAddr::from_str(target).is_ok() || parse_cidr(target).is_some() {
        return None;
    }
    Some(target.to_lowercase())
}

/// Reads targets from a file, one per line. Blank lines and `#` comments are
/// skipped.
pub async fn read_targets_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("target file not found: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
