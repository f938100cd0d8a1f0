//! CIDR parsing for configured route destinations.

use std::net::IpAddr;

/// Parse `addr/prefix`, checking the prefix against the address family.
pub fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

/// Append the host prefix to a bare address: `/32` for IPv4, `/128` for IPv6.
pub fn normalize_cidr(cidr: &str) -> String {
    if cidr.contains('/') {
        return cidr.to_string();
    }
    match cidr.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("{cidr}/128"),
        _ => format!("{cidr}/32"),
    }
}
