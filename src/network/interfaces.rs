//! IPv4 configuration of host interfaces

use nix::ifaddrs::getifaddrs;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// How long configure waits for an interface to get an address
pub const ADDRESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting for an address
pub const ADDRESS_POLL: Duration = Duration::from_secs(5);

/// First IPv4 address of an interface and its netmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Config {
    /// Address
    pub addr: Ipv4Addr,
    /// Netmask
    pub netmask: Ipv4Addr,
}

impl Ipv4Config {
    /// Create a configuration
    pub fn new(addr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { addr, netmask }
    }

    /// Prefix length of the netmask
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.netmask))
    }

    /// Network in CIDR notation (`192.168.1.0/24`)
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.network(), self.prefix_len())
    }
}

/// IPv4 configuration of `nic`, `None` if it has no IPv4 address
pub fn ipv4_config(nic: &str) -> Option<Ipv4Config> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!("getifaddrs failed: {}", e);
            return None;
        }
    };

    addrs
        .filter(|ifa| ifa.interface_name == nic)
        .find_map(|ifa| {
            let addr = ifa.address.as_ref()?.as_sockaddr_in().copied()?;
            let netmask = ifa.netmask.as_ref()?.as_sockaddr_in().copied()?;
            Some(Ipv4Config::new(
                *SocketAddrV4::from(addr).ip(),
                *SocketAddrV4::from(netmask).ip(),
            ))
        })
}

/// Poll `probe` until `nic` reports an address or `timeout` elapses
pub fn wait_for_address(
    nic: &str,
    timeout: Duration,
    step: Duration,
    probe: impl Fn(&str) -> bool,
) -> bool {
    let mut waited = Duration::ZERO;
    loop {
        if probe(nic) {
            return true;
        }
        if waited >= timeout {
            return false;
        }
        tracing::info!("Waiting for an IPv4 address on {}", nic);
        std::thread::sleep(step);
        waited += step.max(Duration::from_millis(1));
    }
}
