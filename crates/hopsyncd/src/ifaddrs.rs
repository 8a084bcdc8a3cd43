//! Local address lookup on the group interface.

use std::net::IpAddr;

use hopsync_services::AddressResolver;

/// Resolves the address of the first interface whose name starts with
/// `prefix` (a P2P group interface is named like `p2p-wlan0-0`).
pub struct IfAddrsResolver {
    prefix: String,
}

impl IfAddrsResolver {
    pub fn new(prefix: String) -> Self {
        Self { prefix }
    }
}

impl AddressResolver for IfAddrsResolver {
    fn local_address(&self) -> Option<IpAddr> {
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!(error = %e, "getifaddrs failed");
                return None;
            }
        };

        let mut v6 = None;
        for ifa in addrs.filter(|ifa| ifa.interface_name.starts_with(&self.prefix)) {
            let Some(address) = ifa.address else {
                continue;
            };
            if let Some(sin) = address.as_sockaddr_in() {
                return Some(IpAddr::V4(sin.ip()));
            }
            if let Some(sin6) = address.as_sockaddr_in6() {
                let ip = sin6.ip();
                if !ip.is_loopback() && v6.is_none() {
                    v6 = Some(IpAddr::V6(ip));
                }
            }
        }
        v6
    }
}
