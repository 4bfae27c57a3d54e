//! Local peer identity: canonical hostname and advertised address.

use {
    crate::error::{NetError, Result},
    get_if_addrs::{get_if_addrs, IfAddr},
    log::debug,
    std::net::{IpAddr, Ipv6Addr},
};

/// The canonical hostname this peer identifies as on the overlay.
pub fn local_hostname() -> Result<String> {
    let hostname = dns_lookup::get_hostname()
        .map_err(|e| NetError::Identity(format!("hostname lookup: {e}")))?;
    if hostname.is_empty() {
        return Err(NetError::Identity("empty local hostname".into()));
    }
    Ok(hostname)
}

/// Resolve the hostname for a peer address, falling back to the
/// numeric form when reverse DNS has nothing.
pub fn hostname_for(addr: &IpAddr) -> String {
    match dns_lookup::lookup_addr(addr) {
        Ok(name) if !name.is_empty() => name,
        Ok(_) | Err(_) => {
            debug!("no reverse DNS for {addr}, using the numeric form");
            addr.to_string()
        }
    }
}

/// The IPv6 address this peer advertises in its hello datagram.
///
/// Prefers an address with the site's `2001` prefix, then any global
/// unicast address, then any non-loopback IPv6 address.
pub fn advertised_ipv6() -> Result<String> {
    let interfaces =
        get_if_addrs().map_err(|e| NetError::Identity(format!("interface enumeration: {e}")))?;
    let mut candidates: Vec<Ipv6Addr> = Vec::new();
    for interface in interfaces {
        if let IfAddr::V6(v6) = interface.addr {
            if !v6.ip.is_loopback() {
                candidates.push(v6.ip);
            }
        }
    }

    if let Some(site) = candidates
        .iter()
        .find(|ip| ip.to_string().starts_with("2001"))
    {
        return Ok(site.to_string());
    }
    if let Some(global) = candidates.iter().find(|ip| is_global_unicast(ip)) {
        return Ok(global.to_string());
    }
    candidates
        .first()
        .map(|ip| ip.to_string())
        .ok_or_else(|| NetError::Identity("no usable IPv6 address".into()))
}

/// Neither link-local (`fe80::/10`) nor unique-local (`fc00::/7`).
fn is_global_unicast(ip: &Ipv6Addr) -> bool {
    let head = ip.segments()[0];
    (head & 0xffc0) != 0xfe80 && (head & 0xfe00) != 0xfc00
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hostname_is_non_empty() {
        let hostname = local_hostname().unwrap();
        assert!(!hostname.is_empty());
    }

    #[test]
    fn test_numeric_fallback_for_unresolvable_addrs() {
        // documentation-range addresses have no PTR records
        let addr: IpAddr = "2001:db8::17".parse().unwrap();
        let name = hostname_for(&addr);
        assert!(!name.is_empty());
    }
}
