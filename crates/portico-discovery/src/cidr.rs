//! Address-range expansion.

use ipnet::IpNet;
use portico_core::{PorticoError, PorticoResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Largest block a single range may expand to.
pub const MAX_RANGE_ADDRESSES: u32 = 256;

/// Expands a bare IP or a CIDR block into concrete addresses.
///
/// A bare IP or a single-host block yields exactly that address. Larger
/// blocks are enumerated in order and lose their network and broadcast
/// addresses when more than two were produced. Blocks with more than
/// [`MAX_RANGE_ADDRESSES`] addresses are rejected without partial output.
pub fn expand_cidr(spec: &str) -> PorticoResult<Vec<String>> {
    let spec = spec.trim();
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(vec![ip.to_string()]);
    }

    let net: IpNet = spec
        .parse()
        .map_err(|e| PorticoError::Validation(format!("invalid address range {spec}: {e}")))?;

    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    if host_bits > MAX_RANGE_ADDRESSES.trailing_zeros() {
        return Err(PorticoError::Validation(format!(
            "range too large: {spec} exceeds {MAX_RANGE_ADDRESSES} addresses"
        )));
    }
    let count = 1u32 << host_bits;

    let mut addrs: Vec<String> = match net {
        IpNet::V4(v4) => {
            let base = u32::from(v4.network());
            (0..count)
                .map(|i| Ipv4Addr::from(base.wrapping_add(i)).to_string())
                .collect()
        }
        IpNet::V6(v6) => {
            let base = u128::from(v6.network());
            (0..count)
                .map(|i| Ipv6Addr::from(base.wrapping_add(u128::from(i))).to_string())
                .collect()
        }
    };

    if addrs.len() > 2 {
        addrs.remove(0);
        addrs.pop();
    }
    Ok(addrs)
}
