//! ARP sysctl settings for multi-rail hosts
//!
//! With several interfaces on the same subnet the kernel must answer ARP
//! only on the interface owning the address, and accept traffic arriving on
//! any rail.

use super::lnet::is_alias;
use crate::error::Result;
use crate::exec::Runner;
use std::path::Path;

/// Host-wide settings (`net.ipv4.conf.all.*`)
pub const ARP_ALL: &[(&str, u8)] = &[("accept_local", 1), ("arp_announce", 2), ("rp_filter", 0)];

/// Per interface settings (`net.ipv4.conf.<nic>.*`)
pub const ARP_PER_NIC: &[(&str, u8)] = &[
    ("arp_ignore", 1),
    ("arp_filter", 0),
    ("arp_announce", 2),
    ("rp_filter", 0),
];

/// Candidate keys in write order; aliases carry no settings of their own
pub fn arp_keys(nics: &[String]) -> Vec<(String, u8)> {
    let all = ARP_ALL
        .iter()
        .map(|(attr, v)| (format!("net.ipv4.conf.all.{}", attr), *v));
    let per_nic = nics.iter().filter(|n| !is_alias(n)).flat_map(|nic| {
        ARP_PER_NIC
            .iter()
            .map(move |(attr, v)| (format!("net.ipv4.conf.{}.{}", nic, attr), *v))
    });
    all.chain(per_nic).collect()
}

/// Current value of a sysctl key, `None` if the key does not exist
pub fn read_key(runner: &Runner, key: &str) -> Option<String> {
    let out = runner.query(format!("sysctl {}", key)).ok()?;
    if !out.success() {
        tracing::info!("Unable to get {}", key);
        return None;
    }
    out.output
        .split_once(" = ")
        .map(|(_, v)| v.trim().to_string())
}

/// Settings applicable on this host
pub fn arp_settings(runner: &Runner, nics: &[String]) -> Vec<(String, u8)> {
    arp_keys(nics)
        .into_iter()
        .filter(|(key, _)| read_key(runner, key).is_some())
        .collect()
}

/// Drop-in file content
pub fn render(settings: &[(String, u8)]) -> String {
    settings
        .iter()
        .map(|(k, v)| format!("{}={}\n", k, v))
        .collect()
}

/// Write the drop-in and reload sysctl settings
pub fn apply_arp(runner: &Runner, path: &Path, settings: &[(String, u8)]) -> Result<()> {
    runner.write_file(path, &render(settings))?;
    let out = runner.apply("sysctl --system")?;
    if !out.success() {
        tracing::warn!("sysctl --system exited with code {}", out.code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use tempfile::tempdir;

    fn nics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keys_skip_aliases() {
        let keys = arp_keys(&nics(&["ib0", "ib0:1", "ib1"]));
        assert_eq!(keys.len(), 3 + 4 * 2);
        assert_eq!(keys[0], ("net.ipv4.conf.all.accept_local".to_string(), 1));
        assert!(!keys.iter().any(|(k, _)| k.contains("ib0:1")));
    }

    #[test]
    fn test_only_existing_keys() {
        let shell = ScriptedShell::new();
        shell
            .on("net.ipv4.conf.ib1.arp_filter", 255, "sysctl: cannot stat /proc/sys/net/ipv4/conf/ib1/arp_filter")
            .on("sysctl net.ipv4.conf", 0, "net.ipv4.conf.x = 0\n");
        let runner = Runner::new(Box::new(shell.clone()), false);

        let settings = arp_settings(&runner, &nics(&["ib1"]));
        assert_eq!(settings.len(), 6);
        assert_eq!(read_key(&runner, "net.ipv4.conf.all.rp_filter").as_deref(), Some("0"));
    }

    #[test]
    fn test_apply_writes_dropin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sysctl.d/99-exascaler.conf");
        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), false);

        let settings = vec![
            ("net.ipv4.conf.all.rp_filter".to_string(), 0),
            ("net.ipv4.conf.ib0.arp_ignore".to_string(), 1),
        ];
        apply_arp(&runner, &path, &settings).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "net.ipv4.conf.all.rp_filter=0\nnet.ipv4.conf.ib0.arp_ignore=1\n"
        );
        assert!(shell.called("sysctl --system"));
    }
}
