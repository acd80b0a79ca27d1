//! Source-based policy routing for multi-rail interfaces
//!
//! Each interface gets a routing table named after it, holding the route
//! to its subnet, and a rule sending traffic from its address to that
//! table.

use super::interfaces::Ipv4Config;
use crate::config::SystemPaths;
use crate::error::{DeployError, IoResultExt, Result};
use crate::exec::Runner;

/// Numbered entries of an `rt_tables` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtTables {
    entries: Vec<(u32, String)>,
}

impl RtTables {
    /// Parse `rt_tables` content; comments and malformed lines are ignored
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| {
                let mut fields = l.split_whitespace();
                let number = fields.next()?.parse().ok()?;
                let name = fields.next().unwrap_or("").to_string();
                Some((number, name))
            })
            .collect();
        Self { entries }
    }

    /// Highest table number in use (0 for an empty registry)
    pub fn max_number(&self) -> u32 {
        self.entries.iter().map(|(n, _)| *n).max().unwrap_or(0)
    }

    /// Is a table named `name` registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(_, n)| n == name)
    }

    /// New entries for the `nics` without a table, numbered after the
    /// current maximum
    pub fn allocate(&self, nics: &[String]) -> Vec<(u32, String)> {
        let mut next = self.max_number();
        let mut allocated: Vec<(u32, String)> = Vec::new();
        for nic in nics {
            if self.contains(nic) || allocated.iter().any(|(_, n)| n == nic) {
                continue;
            }
            next += 1;
            allocated.push((next, nic.clone()));
        }
        allocated
    }
}

/// Routing tables named after one of `nics`, from `ip route show table all`
pub fn tables_to_flush(route_output: &str, nics: &[String]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for line in route_output.lines() {
        let Some((_, rest)) = line.split_once("table") else {
            continue;
        };
        let Some(name) = rest.split_whitespace().next() else {
            continue;
        };
        if nics.iter().any(|n| n == name) && !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}

/// Route and rule commands for one interface
pub fn route_commands(nic: &str, cfg: &Ipv4Config) -> Vec<String> {
    vec![
        format!(
            "ip route add {} dev {} proto kernel scope link src {} table {}",
            cfg.cidr(),
            nic,
            cfg.addr,
            nic
        ),
        format!("ip rule del from {} table {}", cfg.addr, nic),
        format!("ip rule add from {} table {}", cfg.addr, nic),
    ]
}

/// Run a routing command; failures are expected (existing routes, absent
/// rules) and only logged
fn run_quiet(runner: &Runner, cmd: String) -> Result<()> {
    let out = runner.apply(cmd.as_str())?;
    if !out.success() {
        tracing::info!("'{}' exited with code {}", cmd, out.code);
    }
    Ok(())
}

/// Configure per-interface routing tables and rules.
///
/// `lookup` resolves the IPv4 configuration of an interface.
pub fn configure_policy_routing(
    runner: &Runner,
    paths: &SystemPaths,
    nics: &[String],
    lookup: impl Fn(&str) -> Option<Ipv4Config>,
) -> Result<()> {
    let routes = runner.query("ip route show table all")?;
    for table in tables_to_flush(&routes.output, nics) {
        run_quiet(runner, format!("ip route flush table {}", table))?;
    }

    let content = std::fs::read_to_string(&paths.rt_tables).with_path(&paths.rt_tables)?;
    let tables = RtTables::parse(&content);
    for (number, nic) in tables.allocate(nics) {
        runner.append_file(&paths.rt_tables, &format!("\n{} {}", number, nic))?;
    }

    for nic in nics {
        let cfg = lookup(nic).ok_or_else(|| {
            DeployError::validation(format!("Network interface {} has no IPv4 address", nic))
        })?;
        for cmd in route_commands(nic, &cfg) {
            run_quiet(runner, cmd)?;
        }
    }
    run_quiet(runner, "ip route flush cache".to_string())
}

/// Drop cached neighbours of every interface
pub fn flush_neighbours(runner: &Runner, nics: &[String]) -> Result<()> {
    for nic in nics {
        run_quiet(runner, format!("ip neigh flush dev {}", nic))?;
    }
    Ok(())
}
