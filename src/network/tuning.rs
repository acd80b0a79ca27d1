//! Ethernet and Mellanox adapter tuning
//!
//! Best-effort: every step that fails is logged and the overall result
//! turns `false`, but nothing here aborts the configure procedure.
//!
//! Ethernet interfaces get larger rings, more combined channels, LRO and a
//! longer transmit queue. Mellanox adapters additionally get relaxed PCI
//! write ordering, which only takes effect after a reboot.

use super::lnet::base_interface;
use crate::error::{DeployError, Result};
use crate::exec::Runner;
use crate::prompt::Prompter;
use regex::Regex;
use std::sync::LazyLock;

/// Ring size ceiling
pub const RING_CEILING: u32 = 8192;

/// Combined channel ceiling
pub const COMBINED_CEILING: u32 = 32;

/// Transmit queue length applied to every Ethernet interface
pub const TXQUEUELEN: u32 = 20000;

/// `ethtool` exit code for "nothing changed"
const ETHTOOL_UNMODIFIED: i32 = 80;

static PRESET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)pre-set maximums\s*:\s*(.*)$").expect("Invalid ethtool regex"));
static RX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*RX:\s*([0-9]+)").expect("Invalid ethtool regex"));
static TX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*TX:\s*([0-9]+)").expect("Invalid ethtool regex"));
static COMBINED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Combined:\s*([0-9]+)").expect("Invalid ethtool regex"));
static LRO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)large-receive-offload:[^\n]*").expect("Invalid ethtool regex"));
static MST_DEVICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dev/[^ \t]+").expect("Invalid mst regex"));

/// Interfaces of interest as classified by `lshw`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicInventory {
    /// Interfaces with the `ethernet` capability
    pub ethernet: Vec<String>,
    /// Interfaces on a Mellanox adapter
    pub mellanox: Vec<String>,
}

/// Classify `nics` from `lshw -class network -xml` output
pub fn classify_nics(xml: &str, nics: &[String]) -> Result<NicInventory> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| DeployError::parse("lshw xml output", e.to_string()))?;
    let mut inventory = NicInventory::default();

    for nic in nics {
        let node = doc.descendants().find(|n| {
            n.has_tag_name("node")
                && n.children()
                    .any(|c| c.has_tag_name("logicalname") && c.text() == Some(nic.as_str()))
        });
        let Some(node) = node else {
            tracing::debug!("{} not reported by lshw", nic);
            continue;
        };

        let ethernet = node
            .children()
            .filter(|c| c.has_tag_name("capabilities"))
            .flat_map(|c| c.children())
            .any(|cap| cap.attributes().any(|a| a.value().contains("ethernet")));
        if ethernet {
            inventory.ethernet.push(nic.clone());
        }

        let mellanox = node
            .children()
            .any(|c| c.has_tag_name("vendor") && c.text().is_some_and(|t| t.contains("Mellanox")));
        if mellanox {
            inventory.mellanox.push(nic.clone());
        }
    }
    Ok(inventory)
}

fn preset_section(output: &str) -> Option<&str> {
    PRESET_REGEX
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn first_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text).and_then(|c| c[1].parse().ok())
}

/// Maximum RX/TX ring sizes from `ethtool -g`
pub fn ring_maximums(output: &str) -> Option<(u32, u32)> {
    let presets = preset_section(output)?;
    Some((first_number(&RX_REGEX, presets)?, first_number(&TX_REGEX, presets)?))
}

/// Maximum combined channels from `ethtool -l`
pub fn combined_maximum(output: &str) -> Option<u32> {
    first_number(&COMBINED_REGEX, preset_section(output)?)
}

/// Can LRO be toggled, from `ethtool -k`; `None` when not reported
pub fn lro_adjustable(output: &str) -> Option<bool> {
    LRO_REGEX
        .find(output)
        .map(|m| !m.as_str().contains("[fixed]"))
}

/// MST device of `nic` from `mst status -v`
pub fn mst_device(mst_status: &str, nic: &str) -> Option<String> {
    let net_name = format!("net-{}", nic);
    let line = mst_status.lines().find(|l| {
        l.split_whitespace().any(|tok| tok == nic || tok == net_name)
    })?;
    MST_DEVICE_REGEX.find(line).map(|m| m.as_str().to_string())
}

/// Is relaxed write ordering already forced, from `mlxconfig -d <dev> q`
pub fn relaxed_ordering_enabled(mlxconfig_query: &str) -> Option<bool> {
    mlxconfig_query
        .lines()
        .find(|l| l.contains("PCI_WR_ORDERING"))
        .map(|l| l.contains("force_relax(1)"))
}

fn ethtool_ok(code: i32) -> bool {
    code == 0 || code == ETHTOOL_UNMODIFIED
}

/// Applies adapter tunings and records what the operator declined
pub struct EthTuner<'a> {
    runner: &'a Runner,
    prompter: &'a Prompter,
    skip_eth: bool,
    skip_ro: bool,
}

impl<'a> EthTuner<'a> {
    /// Create a tuner; the skip flags come from `-k` and `-j`
    pub fn new(runner: &'a Runner, prompter: &'a Prompter, skip_eth: bool, skip_ro: bool) -> Self {
        Self {
            runner,
            prompter,
            skip_eth,
            skip_ro,
        }
    }

    /// Ethernet tuning skipped, by flag or by answer
    pub fn skip_eth(&self) -> bool {
        self.skip_eth
    }

    /// Relaxed ordering skipped, by flag or by answer
    pub fn skip_ro(&self) -> bool {
        self.skip_ro
    }

    /// Tune `nics`; returns whether every attempted step succeeded
    pub fn tune(&mut self, nics: &[String]) -> Result<bool> {
        let mut bases: Vec<String> = Vec::new();
        for nic in nics {
            let base = base_interface(nic).to_string();
            if !bases.contains(&base) {
                bases.push(base);
            }
        }

        if !self.runner.has_tool("lshw") {
            tracing::info!("lshw isn't available, ethernet tuning skipped");
            return Ok(false);
        }
        let out = self.runner.query("lshw -class network -xml")?;
        if !out.success() {
            tracing::info!("lshw failed, ethernet tuning skipped");
            return Ok(false);
        }
        let inventory = match classify_nics(&out.output, &bases) {
            Ok(inv) => inv,
            Err(e) => {
                tracing::info!("{}, ethernet tuning skipped", e);
                return Ok(false);
            }
        };

        let mut no_error = true;

        if inventory.ethernet.is_empty() {
            tracing::info!("No ethernet interface found, skip eth tuning");
        } else if !self.skip_eth {
            if self.prompter.confirm("\nApply Ethernet tunings", true)? {
                if !self.runner.has_tool("ethtool") {
                    tracing::info!("ethtool isn't installed, ethernet tuning skipped");
                    return Ok(false);
                }
                println!(
                    "Applying Ethernet tuning (ETA: <{} minutes)",
                    inventory.ethernet.len()
                );
                for nic in &inventory.ethernet {
                    no_error &= self.tune_ethernet(nic)?;
                }
            } else {
                self.skip_eth = true;
            }
        }

        if inventory.mellanox.is_empty() {
            tracing::info!("No Mellanox interface found, skip relax ordering tuning");
            return Ok(no_error);
        }
        if self.skip_ro {
            return Ok(no_error);
        }
        if !self.prompter.confirm("\nApply Relax Ordering (mlx)", true)? {
            self.skip_ro = true;
            return Ok(no_error);
        }

        match self.relax_ordering(&inventory.mellanox)? {
            Some(ok) => Ok(no_error && ok),
            None => Ok(false),
        }
    }

    fn tune_ethernet(&self, nic: &str) -> Result<bool> {
        let mut ok = true;

        let out = self.runner.query(format!("ethtool -g {}", nic))?;
        if !out.success() {
            tracing::info!("No ring parameters for interface {}", nic);
        } else if let Some((rx, tx)) = ring_maximums(&out.output) {
            let cmd = format!(
                "ethtool -G {} rx {} tx {}",
                nic,
                rx.min(RING_CEILING),
                tx.min(RING_CEILING)
            );
            if !ethtool_ok(self.runner.apply(cmd)?.code) {
                tracing::info!("Can't tune ring parameters for interface {} (ethtool error)", nic);
                ok = false;
            }
        } else {
            tracing::info!("Can't tune ring parameters for interface {} (parsing error)", nic);
            ok = false;
        }

        let out = self.runner.query(format!("ethtool -l {}", nic))?;
        if !out.success() {
            tracing::info!("No channel parameters for interface {}", nic);
        } else if let Some(combined) = combined_maximum(&out.output) {
            let cmd = format!("ethtool -L {} combined {}", nic, combined.min(COMBINED_CEILING));
            if !ethtool_ok(self.runner.apply(cmd)?.code) {
                tracing::info!("Can't tune channel parameters for interface {} (ethtool error)", nic);
                ok = false;
            }
        } else {
            tracing::info!("Can't tune channel parameters for interface {} (parsing error)", nic);
            ok = false;
        }

        let out = self.runner.query(format!("ethtool -k {}", nic))?;
        if !out.success() {
            tracing::info!("No lro parameters for interface {}", nic);
        } else if lro_adjustable(&out.output) == Some(true) {
            let cmd = format!("ethtool -K {} lro on", nic);
            if !ethtool_ok(self.runner.apply(cmd)?.code) {
                tracing::info!("Can't enable large receive offload for interface {} (ethtool error)", nic);
                ok = false;
            }
        }

        let out = self
            .runner
            .apply(format!("ip link set {} txqueuelen {}", nic, TXQUEUELEN))?;
        if !out.success() {
            tracing::info!("Can't increase transmit queue length for interface {}", nic);
            ok = false;
        }

        Ok(ok)
    }

    /// `None` when the MST service is unusable
    fn relax_ordering(&self, nics: &[String]) -> Result<Option<bool>> {
        if !self.runner.query("mst start")?.success() {
            tracing::info!("Can't modify relax ordering (mst start failed)");
            return Ok(None);
        }
        let status = self.runner.query("mst status -v")?;
        if !status.success() {
            tracing::info!("Can't modify relax ordering (mst status failed)");
            return Ok(None);
        }

        let mut ok = true;
        let mut modified = false;
        for nic in nics {
            let Some(device) = mst_device(&status.output, nic) else {
                tracing::info!("Can't modify relax ordering for {} (not in mst status)", nic);
                ok = false;
                continue;
            };

            let query = self.runner.query(format!("mlxconfig -d {} q", device))?;
            let current = if query.success() {
                relaxed_ordering_enabled(&query.output)
            } else {
                None
            };
            match current {
                Some(true) => tracing::info!("Relax ordering already set for {}", nic),
                Some(false) => {
                    let cmd = format!("mlxconfig -y -d {} s PCI_WR_ORDERING=1", device);
                    if self.runner.apply(cmd)?.success() {
                        modified = true;
                    } else {
                        tracing::info!("Can't modify relax ordering for {} (PCI_WR_ORDERING=1 has failed)", nic);
                        ok = false;
                    }
                }
                None => {
                    tracing::info!("Can't modify relax ordering for {} (unreadable mlxconfig output)", nic);
                    ok = false;
                }
            }
        }

        if modified {
            println!("Relax ordering has been modified, please reboot");
        }
        Ok(Some(ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;

    const LSHW: &str = r#"<?xml version="1.0" standalone="yes" ?>
<!-- generated by lshw-B.02.18 -->
<list>
<node id="network:0" claimed="true" class="network" handle="PCI:0000:3b:00.0">
 <description>Ethernet interface</description>
 <product>MT27800 Family [ConnectX-5]</product>
 <vendor>Mellanox Technologies</vendor>
 <logicalname>ens1f0</logicalname>
 <capabilities>
  <capability id="pciexpress" >PCI Express</capability>
  <capability id="ethernet" />
  <capability id="physical" >Physical interface</capability>
 </capabilities>
</node>
<node id="network:1" claimed="true" class="network" handle="PCI:0000:5e:00.0">
 <description>Infiniband interface</description>
 <vendor>Mellanox Technologies</vendor>
 <logicalname>ib0</logicalname>
 <capabilities>
  <capability id="pciexpress" >PCI Express</capability>
 </capabilities>
</node>
<node id="network:2" claimed="true" class="network">
 <description>Ethernet interface</description>
 <vendor>Intel Corporation</vendor>
 <logicalname>eno1</logicalname>
 <capabilities>
  <capability id="ethernet" />
 </capabilities>
</node>
</list>
"#;

    const ETHTOOL_G: &str = "Ring parameters for ens1f0:\nPre-set maximums:\nRX:\t\t8192\nRX Mini:\tn/a\nRX Jumbo:\tn/a\nTX:\t\t16384\nCurrent hardware settings:\nRX:\t\t1024\nRX Mini:\tn/a\nRX Jumbo:\tn/a\nTX:\t\t1024\n";

    const ETHTOOL_L: &str = "Channel parameters for ens1f0:\nPre-set maximums:\nRX:\t\tn/a\nTX:\t\tn/a\nOther:\t\t512\nCombined:\t63\nCurrent hardware settings:\nRX:\t\tn/a\nTX:\t\tn/a\nOther:\t\t0\nCombined:\t8\n";

    const MST_STATUS: &str = "MST modules:\n------------\n    MST PCI module is not loaded\n    MST PCI configuration module loaded\nPCI devices:\n------------\nDEVICE_TYPE             MST                           PCI       RDMA            NET                       NUMA\nConnectX5(rev:0)        /dev/mst/mt4119_pciconf0      3b:00.0   mlx5_0          net-ens1f0                0\nConnectX6(rev:0)        /dev/mst/mt4123_pciconf0      5e:00.0   mlx5_1          net-ib0                   0\n";

    fn nics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_nics() {
        let inv = classify_nics(LSHW, &nics(&["ens1f0", "ib0", "eno1", "eth9"])).unwrap();
        assert_eq!(inv.ethernet, vec!["ens1f0", "eno1"]);
        assert_eq!(inv.mellanox, vec!["ens1f0", "ib0"]);
        assert!(classify_nics("<list><node>", &nics(&["ib0"])).is_err());
    }

    #[test]
    fn test_ethtool_parsing() {
        assert_eq!(ring_maximums(ETHTOOL_G), Some((8192, 16384)));
        assert_eq!(combined_maximum(ETHTOOL_L), Some(63));
        assert_eq!(ring_maximums("Ring parameters for lo:\n"), None);
        assert_eq!(lro_adjustable("large-receive-offload: off\n"), Some(true));
        assert_eq!(lro_adjustable("large-receive-offload: off [fixed]\n"), Some(false));
        assert_eq!(lro_adjustable("tcp-segmentation-offload: on\n"), None);
    }

    #[test]
    fn test_mst_and_mlxconfig_parsing() {
        assert_eq!(mst_device(MST_STATUS, "ib0").as_deref(), Some("/dev/mst/mt4123_pciconf0"));
        assert_eq!(mst_device(MST_STATUS, "ib1"), None);
        assert_eq!(
            relaxed_ordering_enabled("         PCI_WR_ORDERING                     per_mkey(0)\n"),
            Some(false)
        );
        assert_eq!(
            relaxed_ordering_enabled("         PCI_WR_ORDERING                     force_relax(1)\n"),
            Some(true)
        );
    }

    fn tuning_shell() -> std::rc::Rc<ScriptedShell> {
        let shell = ScriptedShell::new();
        shell
            .tool("lshw")
            .tool("ethtool")
            .on("lshw", 0, LSHW)
            .on("ethtool -g", 0, ETHTOOL_G)
            .on("ethtool -l", 0, ETHTOOL_L)
            .on("ethtool -k", 0, "large-receive-offload: off\n")
            .on("ethtool -G", ETHTOOL_UNMODIFIED, "")
            .on("mst status -v", 0, MST_STATUS)
            .on("mlxconfig -d /dev/mst/mt4119", 0, "PCI_WR_ORDERING   force_relax(1)\n")
            .on("mlxconfig -d /dev/mst/mt4123", 0, "PCI_WR_ORDERING   per_mkey(0)\n");
        shell
    }

    #[test]
    fn test_tune_all() {
        let shell = tuning_shell();
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(Vec::<String>::new(), true);
        let mut tuner = EthTuner::new(&runner, &prompter, false, false);

        assert!(tuner.tune(&nics(&["ens1f0", "ib0", "ens1f0:1"])).unwrap());
        assert!(shell.called("ethtool -G ens1f0 rx 8192 tx 8192"));
        assert!(shell.called("ethtool -L ens1f0 combined 32"));
        assert!(shell.called("ethtool -K ens1f0 lro on"));
        assert!(shell.called("ip link set ens1f0 txqueuelen 20000"));
        assert!(!shell.called("ethtool -g ib0"));
        assert!(shell.called("mlxconfig -y -d /dev/mst/mt4123_pciconf0 s PCI_WR_ORDERING=1"));
        assert!(!shell.called("mlxconfig -y -d /dev/mst/mt4119_pciconf0"));
    }

    #[test]
    fn test_declined_prompts_flip_skip_flags() {
        let shell = tuning_shell();
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(["n", "n"], false);
        let mut tuner = EthTuner::new(&runner, &prompter, false, false);

        assert!(tuner.tune(&nics(&["ens1f0"])).unwrap());
        assert!(tuner.skip_eth());
        assert!(tuner.skip_ro());
        assert!(!shell.called("ethtool -G"));
        assert!(!shell.called("mst start"));
    }

    #[test]
    fn test_without_lshw() {
        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(Vec::<String>::new(), true);
        let mut tuner = EthTuner::new(&runner, &prompter, false, false);

        assert!(!tuner.tune(&nics(&["eth0"])).unwrap());
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn test_failed_step_reported() {
        let shell = tuning_shell();
        shell.on("txqueuelen", 2, "RTNETLINK answers: Operation not permitted");
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(Vec::<String>::new(), true);
        let mut tuner = EthTuner::new(&runner, &prompter, false, true);

        assert!(!tuner.tune(&nics(&["eno1"])).unwrap());
        assert!(!shell.called("mst"));
    }
}
