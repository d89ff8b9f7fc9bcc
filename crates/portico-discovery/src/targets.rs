//! Target generation with self-exclusion.

use crate::cidr::expand_cidr;
use portico_core::{PorticoResult, ScanConfig};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// `host:port` strings under which this process is reachable on `listen_port`.
///
/// Covers every interface address, IPv4 and IPv6 loopback and the
/// `localhost` name. IPv6 hosts are bracketed the way targets are.
pub fn self_addresses(listen_port: u16) -> Vec<String> {
    let mut ips: Vec<IpAddr> = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces.iter().map(|iface| iface.ip()).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            Vec::new()
        }
    };
    ips.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    ips.push(IpAddr::V6(Ipv6Addr::LOCALHOST));

    let mut seen = HashSet::new();
    let mut hosts: Vec<String> = ips
        .into_iter()
        .filter(|ip| !ip.is_unspecified() && seen.insert(*ip))
        .map(|ip| match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        })
        .collect();
    hosts.push("localhost".to_string());
    hosts
        .into_iter()
        .map(|host| format!("{host}:{listen_port}"))
        .collect()
}

/// Builds the ordered, deduplicated `http://address:port` targets of a scan.
///
/// A target is dropped when any exclusion is a substring of it. Exclusion is
/// best-effort: `10.0.0.1:80` also drops `10.0.0.1:8080`.
pub fn generate_targets(config: &ScanConfig, own_addresses: &[String]) -> PorticoResult<Vec<String>> {
    let mut exclusions: Vec<&str> = Vec::new();
    if config.exclude_self {
        exclusions.extend(own_addresses.iter().map(String::as_str));
    }
    exclusions.extend(
        config
            .exclude_addresses
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty()),
    );

    let ports = config.expanded_ports()?;
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for range in &config.ranges {
        for addr in expand_cidr(range)? {
            let host = if addr.contains(':') {
                format!("[{addr}]")
            } else {
                addr
            };
            for port in &ports {
                let target = format!("http://{host}:{port}");
                if exclusions.iter().any(|ex| target.contains(ex)) {
                    continue;
                }
                if seen.insert(target.clone()) {
                    targets.push(target);
                }
            }
        }
    }

    Ok(targets)
}
