//! Pure DNS lookup, no cache fallback. Mirrors
//! `_discover_peers_dns_only` from the original implementation: resolve a
//! service name to every IPv4 address behind it, producing a deterministic
//! sorted `ip:port` list.

use std::collections::BTreeSet;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

pub fn discover_peers_dns_only(hostname: &str, port: u16) -> io::Result<Vec<String>> {
    if hostname.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "hostname cannot be empty"));
    }

    let addrs = (hostname, port).to_socket_addrs()?;

    let unique_ips: BTreeSet<String> = addrs
        .filter_map(|addr: SocketAddr| match addr {
            SocketAddr::V4(v4) => Some(v4.ip().to_string()),
            SocketAddr::V6(_) => None,
        })
        .collect();

    let peers: Vec<String> = unique_ips.into_iter().map(|ip| format!("{ip}:{port}")).collect();

    if peers.is_empty() {
        log::info!("DNS discovery: {hostname} -> 0 peers found");
    } else {
        log::info!("DNS discovery: {hostname} -> {} peer(s) found {peers:?}", peers.len());
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_hostname() {
        let result = discover_peers_dns_only("", 8000);
        assert!(result.is_err());
    }

    #[test]
    fn resolves_localhost_to_loopback() {
        let peers = discover_peers_dns_only("localhost", 9100).unwrap();
        assert!(peers.iter().any(|p| p == "127.0.0.1:9100"));
    }
}
