//! Kernel module parameters (`/etc/modprobe.d/lustre.conf`)
//!
//! The file is read into an ordered module → parameter → value mapping,
//! merged with the client defaults and rewritten wholesale. Parameters the
//! operator added are kept; only `lnet.networks` and the `libcfs` CPU
//! partition keys are always overwritten.

use crate::error::{IoResultExt, Result};
use crate::exec::Runner;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static OPTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^ \t]+=("[^"]*"|[^ \t]*)"#).expect("Invalid modprobe option regex"));

/// Header of the generated file
pub const HEADER: &str = "# This file has been generated by exa-client-deploy
#
# Do not edit unless exa-client-deploy service is stopped & disabled
# e.g: 'systemctl status exa-client-deploy'
#

";

/// Defaults filled in when absent
const DEFAULTS: &[(&str, &str, &str)] = &[
    ("lnet", "lnet_transaction_timeout", "100"),
    ("lnet", "lnet_retry_count", "2"),
    ("ko2iblnd", "peer_credits", "32"),
    ("ko2iblnd", "peer_credits_hiw", "16"),
    ("ko2iblnd", "concurrent_sends", "64"),
    ("ksocklnd", "conns_per_peer", "0"),
];

type Params = Vec<(String, String)>;

/// Ordered module parameter mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModprobeConf {
    modules: Vec<(String, Params)>,
}

impl ModprobeConf {
    /// Parse `options <module> key=value ...` lines; anything else is dropped
    pub fn parse(content: &str) -> Self {
        let mut conf = Self::default();
        for line in content.lines() {
            let mut words = line.split_whitespace();
            if words.next() != Some("options") {
                continue;
            }
            let Some(module) = words.next() else {
                continue;
            };
            // a module without parameters still keeps its position
            conf.module_mut(module);
            for m in OPTION_REGEX.find_iter(line) {
                if let Some((key, value)) = m.as_str().split_once('=') {
                    conf.set(module, key, value);
                }
            }
        }
        conf
    }

    /// Read `path`; a missing file is an empty configuration
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_path(path),
        }
    }

    fn module_mut(&mut self, module: &str) -> &mut Params {
        let idx = match self.modules.iter().position(|(m, _)| m == module) {
            Some(idx) => idx,
            None => {
                self.modules.push((module.to_string(), Vec::new()));
                self.modules.len() - 1
            }
        };
        &mut self.modules[idx].1
    }

    /// Value of `module.key`
    pub fn get(&self, module: &str, key: &str) -> Option<&str> {
        self.modules
            .iter()
            .find(|(m, _)| m == module)
            .and_then(|(_, params)| params.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    /// Set `module.key`, keeping the position of an existing key
    pub fn set(&mut self, module: &str, key: &str, value: &str) {
        let params = self.module_mut(module);
        match params.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => params.push((key.to_string(), value.to_string())),
        }
    }

    /// Set `module.key` only when absent
    pub fn set_default(&mut self, module: &str, key: &str, value: &str) {
        if self.get(module, key).is_none() {
            self.set(module, key, value);
        }
    }

    /// Merge the client settings: `networks` (quoted) and the CPU
    /// partitions are forced, the remaining defaults only fill gaps
    pub fn merge_client_defaults(&mut self, networks: &str, cpu_npartitions: Option<u32>) {
        self.set("lnet", "networks", networks);
        if let Some(n) = cpu_npartitions {
            self.set("libcfs", "cpu_npartitions", &n.to_string());
            // cpu_npartitions is ignored unless cpu_pattern is empty
            self.set("libcfs", "cpu_pattern", "\"\"");
        }
        for (module, key, value) in DEFAULTS {
            self.set_default(module, key, value);
        }
    }

    /// `options` lines, one per parameter
    pub fn option_lines(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, params)| {
                params
                    .iter()
                    .map(move |(k, v)| format!("options {} {}={}", module, k, v))
            })
            .collect()
    }

    /// Full file content, header included
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        for line in self.option_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Rewrite `path`
    pub fn save(&self, runner: &Runner, path: &Path) -> Result<()> {
        runner.write_file(path, &self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use proptest::prelude::*;
    use tempfile::tempdir;

    const OPERATOR_CONF: &str = "options lnet networks=\"o2ib(ib0)\" lnet_retry_count=3\n\
        # local tweak\n\
        options ko2iblnd peer_credits=64 map_on_demand=1\n\
        options mdc max_rpcs_in_flight=64\n";

    #[test]
    fn test_parse() {
        let conf = ModprobeConf::parse(OPERATOR_CONF);
        assert_eq!(conf.get("lnet", "networks"), Some("\"o2ib(ib0)\""));
        assert_eq!(conf.get("lnet", "lnet_retry_count"), Some("3"));
        assert_eq!(conf.get("ko2iblnd", "map_on_demand"), Some("1"));
        assert_eq!(conf.get("mdc", "max_rpcs_in_flight"), Some("64"));
        assert_eq!(conf.get("ksocklnd", "conns_per_peer"), None);
    }

    #[test]
    fn test_quoted_values_with_spaces() {
        let conf = ModprobeConf::parse("options lnet networks=\"o2ib(ib0) tcp(eth0)\" accept=all\n");
        assert_eq!(conf.get("lnet", "networks"), Some("\"o2ib(ib0) tcp(eth0)\""));
        assert_eq!(conf.get("lnet", "accept"), Some("all"));
    }

    #[test]
    fn test_merge_keeps_operator_keys() {
        let mut conf = ModprobeConf::parse(OPERATOR_CONF);
        conf.merge_client_defaults("\"o2ib(ib0,ib1)\"", Some(24));

        assert_eq!(conf.get("lnet", "networks"), Some("\"o2ib(ib0,ib1)\""));
        assert_eq!(conf.get("lnet", "lnet_retry_count"), Some("3"));
        assert_eq!(conf.get("lnet", "lnet_transaction_timeout"), Some("100"));
        assert_eq!(conf.get("ko2iblnd", "peer_credits"), Some("64"));
        assert_eq!(conf.get("ko2iblnd", "peer_credits_hiw"), Some("16"));
        assert_eq!(conf.get("libcfs", "cpu_npartitions"), Some("24"));
        assert_eq!(conf.get("libcfs", "cpu_pattern"), Some("\"\""));
        assert_eq!(conf.get("ksocklnd", "conns_per_peer"), Some("0"));
    }

    #[test]
    fn test_render() {
        let mut conf = ModprobeConf::default();
        conf.merge_client_defaults("\"tcp(eth0)\"", None);
        let rendered = conf.render();
        assert!(rendered.starts_with(HEADER));
        assert!(rendered.contains("\noptions lnet networks=\"tcp(eth0)\"\n"));
        assert!(rendered.ends_with("options ksocklnd conns_per_peer=0\n"));
        assert!(!rendered.contains("libcfs"));
    }

    #[test]
    fn test_load_missing_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modprobe.d/lustre.conf");
        assert_eq!(ModprobeConf::load(&path).unwrap(), ModprobeConf::default());

        let runner = Runner::new(Box::new(ScriptedShell::new()), false);
        let mut conf = ModprobeConf::default();
        conf.merge_client_defaults("\"o2ib(ib0)\"", None);
        conf.save(&runner, &path).unwrap();
        assert_eq!(ModprobeConf::load(&path).unwrap(), conf);
    }

    fn operator_params() -> impl Strategy<Value = Vec<(String, String, String)>> {
        proptest::collection::vec(
            (
                prop_oneof![Just("lnet"), Just("ko2iblnd"), Just("ksocklnd"), Just("osc")],
                "[a-z_]{3,12}",
                "[0-9]{1,4}",
            )
                .prop_map(|(m, k, v)| (m.to_string(), k, v)),
            0..10,
        )
    }

    proptest! {
        #[test]
        fn prop_configure_twice_is_stable(params in operator_params(), parts in proptest::option::of(1u32..64)) {
            let mut operator = ModprobeConf::default();
            for (m, k, v) in &params {
                operator.set(m, k, v);
            }

            let mut first = ModprobeConf::parse(&operator.render());
            first.merge_client_defaults("\"o2ib(ib0,ib1)\"", parts);
            let mut second = ModprobeConf::parse(&first.render());
            second.merge_client_defaults("\"o2ib(ib0,ib1)\"", parts);

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.render(), second.render());
            for (m, k, _) in &params {
                if !(m == "lnet" && k == "networks") {
                    prop_assert_eq!(second.get(m, k), operator.get(m, k));
                }
            }
            let lines = second.option_lines();
            let mut dedup = lines.clone();
            dedup.sort();
            dedup.dedup();
            prop_assert_eq!(dedup.len(), lines.len());
        }
    }
}
