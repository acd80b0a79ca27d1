//! Host network configuration for the Lustre client
//!
//! - LNet specification parsing and interface validation
//! - IPv4 address lookup for the interfaces LNet uses
//! - Multi-rail ARP sysctl settings and source-based policy routing
//! - Ethernet and Mellanox adapter tuning
//!
//! ## Multi-rail
//!
//! When LNet uses more than one interface the host must route replies out
//! of the interface that received the request. [`configure_multirail`]
//! writes the ARP settings, gives each interface its own routing table and
//! flushes stale neighbour entries.

pub mod interfaces;
pub mod lnet;
pub mod routing;
pub mod sysctl;
pub mod tuning;

pub use interfaces::{ipv4_config, wait_for_address, Ipv4Config, ADDRESS_POLL, ADDRESS_TIMEOUT};
pub use lnet::{default_lnet, LnetNet, LnetSpec, Transport};
pub use routing::RtTables;
pub use tuning::{EthTuner, NicInventory};

use crate::config::SystemPaths;
use crate::error::Result;
use crate::exec::Runner;

/// Configure ARP and routing for several interfaces sharing LNet.
///
/// `lookup` resolves the IPv4 configuration of an interface.
pub fn configure_multirail(
    runner: &Runner,
    paths: &SystemPaths,
    nics: &[String],
    lookup: impl Fn(&str) -> Option<Ipv4Config>,
) -> Result<()> {
    tracing::info!("Configuring multi-rail routing for {}", nics.join(", "));

    let settings = sysctl::arp_settings(runner, nics);
    sysctl::apply_arp(runner, &paths.sysctl_conf, &settings)?;
    routing::configure_policy_routing(runner, paths, nics, lookup)?;
    routing::flush_neighbours(runner, nics)
}
