//! LNet specifications
//!
//! An LNet specification is a semicolon separated list of networks such as
//! `o2ib0(ib0,ib1);tcp(eth0)`: a transport, an optional index and the
//! interfaces in parentheses.

use crate::error::{DeployError, IoResultExt, Result};
use crate::exec::Runner;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static LNET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<transport>tcp|o2ib)(?P<index>[0-9]*)\((?P<nics>.+)\)$")
        .expect("Invalid LNet regex")
});

static IBDEV2NETDEV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^mlx.*\sport\s1\s==>\s(?P<interface>\S+)\s\(Up\)").expect("Invalid ibdev2netdev regex")
});

/// LNet transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transport {
    /// Socket LND
    Tcp,
    /// InfiniBand LND
    O2ib,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::O2ib => write!(f, "o2ib"),
        }
    }
}

/// One network of an LNet specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LnetNet {
    /// Transport
    pub transport: Transport,
    /// Network index (`0` of `o2ib0`), if given
    pub index: Option<u32>,
    /// Interfaces, as written (aliases kept)
    pub interfaces: Vec<String>,
}

impl LnetNet {
    /// Parse `o2ib0(ib0,ib1)`
    pub fn parse(s: &str) -> Result<Self> {
        let caps = LNET_REGEX
            .captures(s.trim_end())
            .ok_or_else(|| DeployError::InvalidLnet(s.to_string()))?;

        let transport = match &caps["transport"] {
            "tcp" => Transport::Tcp,
            _ => Transport::O2ib,
        };
        let index = match &caps["index"] {
            "" => None,
            i => Some(i.parse().map_err(|_| DeployError::InvalidLnet(s.to_string()))?),
        };
        let interfaces: Vec<String> = caps["nics"]
            .split(',')
            .map(|n| n.trim().to_string())
            .collect();
        if interfaces.iter().any(|n| n.is_empty()) {
            return Err(DeployError::InvalidLnet(s.to_string()));
        }

        Ok(Self {
            transport,
            index,
            interfaces,
        })
    }
}

impl fmt::Display for LnetNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.transport)?;
        if let Some(i) = self.index {
            write!(f, "{}", i)?;
        }
        write!(f, "({})", self.interfaces.join(","))
    }
}

/// Parsed LNet specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LnetSpec {
    /// Networks, in the order given
    pub nets: Vec<LnetNet>,
}

impl LnetSpec {
    /// Parse a semicolon separated specification
    pub fn parse(s: &str) -> Result<Self> {
        let nets = s
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .map(LnetNet::parse)
            .collect::<Result<Vec<_>>>()?;
        if nets.is_empty() {
            return Err(DeployError::InvalidLnet(s.to_string()));
        }
        Ok(Self { nets })
    }

    /// Every referenced interface, first occurrence order, no duplicates
    pub fn interfaces(&self) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::new();
        for nic in self.nets.iter().flat_map(|n| n.interfaces.iter()) {
            if seen.insert(nic) {
                ordered.push(nic.clone());
            }
        }
        ordered
    }

    /// Networks in canonical form
    pub fn entries(&self) -> Vec<String> {
        self.nets.iter().map(ToString::to_string).collect()
    }

    /// Value of the `lnet` module `networks` parameter (quoted)
    pub fn networks_value(&self) -> String {
        format!("\"{}\"", self.entries().join(","))
    }

    /// Fail when an interface (alias suffix stripped) is not on the host
    pub fn validate_interfaces(&self, sys_class_net: &Path) -> Result<()> {
        let available = host_interfaces(sys_class_net)?;
        let missing: Vec<String> = self
            .interfaces()
            .into_iter()
            .filter(|nic| !available.iter().any(|a| a == base_interface(nic)))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeployError::validation(format!(
                "Incorrect interface names specified: {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Display for LnetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries().join(";"))
    }
}

/// Interface name without its alias suffix (`eth0` of `eth0:1`)
pub fn base_interface(nic: &str) -> &str {
    nic.split(':').next().unwrap_or(nic)
}

/// Is `nic` an alias (`eth0:1`)
pub fn is_alias(nic: &str) -> bool {
    nic.contains(':')
}

/// Interface names present on the host
pub fn host_interfaces(sys_class_net: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(sys_class_net).with_path(sys_class_net)?;
    Ok(entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect())
}

/// Default specification covering the InfiniBand ports that are up,
/// as reported by `ibdev2netdev`
pub fn default_lnet(runner: &Runner) -> Option<String> {
    let out = runner.query("ibdev2netdev").ok()?;
    if !out.success() {
        return None;
    }
    let nics = parse_ibdev2netdev(&out.output);
    if nics.is_empty() {
        tracing::info!("No infiniband interface is up");
        return None;
    }
    Some(format!("o2ib({})", nics.join(",")))
}

/// Interfaces of port 1 links in state Up
pub fn parse_ibdev2netdev(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|l| IBDEV2NETDEV_REGEX.captures(l))
        .map(|c| c["interface"].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use tempfile::tempdir;

    #[test]
    fn test_parse_spec() {
        let spec = LnetSpec::parse("o2ib0(ib0,ib1)").unwrap();
        assert_eq!(spec.interfaces(), vec!["ib0", "ib1"]);
        assert_eq!(spec.nets[0].transport, Transport::O2ib);
        assert_eq!(spec.nets[0].index, Some(0));

        let spec = LnetSpec::parse(" o2ib(ib0, ib1);tcp1(eth0:1,ib0)").unwrap();
        assert_eq!(spec.interfaces(), vec!["ib0", "ib1", "eth0:1"]);
        assert_eq!(spec.networks_value(), "\"o2ib(ib0,ib1),tcp1(eth0:1,ib0)\"");
        assert_eq!(spec.to_string(), "o2ib(ib0,ib1);tcp1(eth0:1,ib0)");
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["", "ib0", "o2ib0()", "gni(ib0)", "o2ib0(ib0", "o2ib(ib0,)"] {
            assert!(LnetSpec::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_validate_interfaces() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ib1")).unwrap();
        std::fs::create_dir(dir.path().join("eth0")).unwrap();

        let spec = LnetSpec::parse("o2ib0(ib0,ib1)").unwrap();
        let err = spec.validate_interfaces(dir.path()).unwrap_err();
        assert!(err.to_string().contains("ib0"));

        std::fs::create_dir(dir.path().join("ib0")).unwrap();
        assert!(spec.validate_interfaces(dir.path()).is_ok());
        // alias resolves to its base interface
        assert!(LnetSpec::parse("tcp(eth0:3)").unwrap().validate_interfaces(dir.path()).is_ok());
    }

    #[test]
    fn test_default_lnet() {
        let shell = ScriptedShell::new();
        shell.on(
            "ibdev2netdev",
            0,
            "mlx5_0 port 1 ==> ib0 (Up)\nmlx5_1 port 1 ==> ib1 (Down)\nmlx5_2 port 1 ==> ib2 (Up)\n",
        );
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert_eq!(default_lnet(&runner).as_deref(), Some("o2ib(ib0,ib2)"));

        let runner = Runner::new(Box::new(ScriptedShell::with_default(127)), false);
        assert_eq!(default_lnet(&runner), None);
    }

    #[test]
    fn test_alias_helpers() {
        assert_eq!(base_interface("eth0:1"), "eth0");
        assert_eq!(base_interface("ib0"), "ib0");
        assert!(is_alias("eth0:1"));
    }
}
