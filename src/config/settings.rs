//! Configuration settings for exa-client-deploy
//!
//! Defines the CLI arguments, the resolved deploy configuration and the
//! host file locations the procedure reads and writes.

use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Tool version, reported in the interactive banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// DDN EXAScaler client software installation tool
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "exa_client_deploy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install and configure DDN EXAScaler client software")]
#[command(long_about = r#"
Installs, configures and removes the EXAScaler (Lustre) client stack.

Without any of -i/-c/-r/-m an interactive menu is shown. With one or more of
them every requested action runs once, in the order install, configure,
remove, list-mount.

Examples:
  exa_client_deploy                                  # Interactive menu
  exa_client_deploy -i -c -l "o2ib(ib0,ib1)" --yes   # Build, install and configure
  exa_client_deploy -i --dkms --emf 10.0.0.10        # Install prebuilt DKMS packages
  exa_client_deploy -c -l "tcp(eth0)" -d             # Show what configure would do
"#)]
pub struct CliArgs {
    /// Install EXAScaler client software
    #[arg(short = 'i', long)]
    pub install: bool,

    /// Configure EXAScaler client software
    #[arg(short = 'c', long)]
    pub configure: bool,

    /// List EXAScaler mount commands
    #[arg(short = 'm', long)]
    pub list_mount: bool,

    /// Remove EXAScaler client software
    #[arg(short = 'r', long)]
    pub remove: bool,

    /// Skip configuring persistency for lustre tuning
    #[arg(short = 'p', long = "skip-persistent-tuning")]
    pub skip_persistent_tuning: bool,

    /// Semicolon separated LNets to use, e.g. "o2ib0(ib0,ib1);tcp(eth0)"
    #[arg(short = 'l', long, value_name = "LNETS")]
    pub lnets: Option<String>,

    /// cpu_npartitions for libcfs module (for DGX systems)
    #[arg(short = 'n', long = "npartitions", value_name = "NUM")]
    pub cpu_npartitions: Option<u32>,

    /// Dry run: print the commands that would change the host
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to Lustre source file. If not specified will look in
    /// lustre-source.tar.gz and lustre-source
    #[arg(short = 's', long = "src-file", value_name = "PATH")]
    pub src_file: Option<PathBuf>,

    /// Skip Relax Ordering tuning
    #[arg(short = 'j', long = "skip-ro-tuning")]
    pub skip_ro_tuning: bool,

    /// Skip Ethernet tunings
    #[arg(short = 'k', long = "skip-eth-tuning")]
    pub skip_eth_tuning: bool,

    /// Use DKMS installation from EMF repo
    #[arg(long)]
    pub dkms: bool,

    /// IP/FQDN pointing to your EMF installation
    #[arg(long, value_name = "HOST")]
    pub emf: Option<String>,

    /// Automatic yes to prompts; run non-interactively
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Force disable o2ib related module build
    #[arg(long = "disable-o2ib")]
    pub disable_o2ib: bool,
}

/// Host file locations used by the procedure.
///
/// Every path the tool reads or writes lives here so that a whole run can be
/// redirected under a scratch root with [`SystemPaths::under`].
#[derive(Debug, Clone, Serialize)]
pub struct SystemPaths {
    /// PID lock file
    pub lock_file: PathBuf,
    /// Append-only log file
    pub log_file: PathBuf,
    /// Kernel module parameters for lustre/lnet
    pub modprobe_conf: PathBuf,
    /// ARP sysctl drop-in
    pub sysctl_conf: PathBuf,
    /// iproute2 routing table registry
    pub rt_tables: PathBuf,
    /// Backup of the live LNet configuration
    pub lnet_conf: PathBuf,
    /// apt source for DKMS packages
    pub apt_source: PathBuf,
    /// yum repository for DKMS packages
    pub yum_repo: PathBuf,
    /// Network interface directory
    pub sys_class_net: PathBuf,
    /// os-release candidates, in lookup order
    pub os_release: Vec<PathBuf>,
    /// Legacy distribution release files, in lookup order
    pub legacy_release: Vec<PathBuf>,
    /// Installation root for packages, the tool copy and its service unit
    pub install_root: PathBuf,
    /// Lustre source archive shipped by the installer package
    pub installed_source: PathBuf,
    /// Kernel sources of MOFED (`ofa_kernel`)
    pub ofa_kernel: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/var/run/exa_client_deploy.lock"),
            log_file: PathBuf::from("/var/log/exa_client_deploy.log"),
            modprobe_conf: PathBuf::from("/etc/modprobe.d/lustre.conf"),
            sysctl_conf: PathBuf::from("/etc/sysctl.d/99-exascaler.conf"),
            rt_tables: PathBuf::from("/etc/iproute2/rt_tables"),
            lnet_conf: PathBuf::from("/etc/lnet.conf"),
            apt_source: PathBuf::from("/etc/apt/sources.list.d/exascaler-client.list"),
            yum_repo: PathBuf::from("/etc/yum.repos.d/exascaler-client.repo"),
            sys_class_net: PathBuf::from("/sys/class/net"),
            os_release: vec![
                PathBuf::from("/etc/os-release"),
                PathBuf::from("/usr/lib/os-release"),
            ],
            legacy_release: vec![
                PathBuf::from("/etc/redhat-release"),
                PathBuf::from("/etc/centos-release"),
                PathBuf::from("/etc/lsb-release"),
            ],
            install_root: PathBuf::from("/opt/ddn/exascaler"),
            installed_source: PathBuf::from("/usr/share/ddn/lustre-source.tar.gz"),
            ofa_kernel: PathBuf::from("/usr/src/ofa_kernel"),
        }
    }
}

impl SystemPaths {
    /// Rebase every default path under `root`
    pub fn under(root: &Path) -> Self {
        let rebase = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(&p));
        let d = Self::default();
        Self {
            lock_file: rebase(d.lock_file),
            log_file: rebase(d.log_file),
            modprobe_conf: rebase(d.modprobe_conf),
            sysctl_conf: rebase(d.sysctl_conf),
            rt_tables: rebase(d.rt_tables),
            lnet_conf: rebase(d.lnet_conf),
            apt_source: rebase(d.apt_source),
            yum_repo: rebase(d.yum_repo),
            sys_class_net: rebase(d.sys_class_net),
            os_release: d.os_release.into_iter().map(rebase).collect(),
            legacy_release: d.legacy_release.into_iter().map(rebase).collect(),
            install_root: rebase(d.install_root),
            installed_source: rebase(d.installed_source),
            ofa_kernel: rebase(d.ofa_kernel),
        }
    }

    /// Directory holding the generated systemd unit
    pub fn systemd_dir(&self) -> PathBuf {
        self.install_root.join("systemd")
    }

    /// Generated systemd unit
    pub fn service_unit(&self) -> PathBuf {
        self.systemd_dir().join("exa-client-deploy.service")
    }

    /// Installed copy of this tool, started by the service unit
    pub fn installed_binary(&self) -> PathBuf {
        self.install_root.join("exa_client_deploy")
    }
}

/// Resolved deploy configuration
#[derive(Debug, Clone, Serialize)]
pub struct DeployConfig {
    /// Install requested from the CLI
    pub install: bool,
    /// Configure requested from the CLI
    pub configure: bool,
    /// Remove requested from the CLI
    pub remove: bool,
    /// Mount listing requested from the CLI
    pub list_mount: bool,
    /// LNets given on the CLI (raw, semicolon separated)
    pub lnets: Option<String>,
    /// CPU partitions for libcfs
    pub cpu_npartitions: Option<u32>,
    /// Lustre source (archive or directory), absolute
    pub src_file: Option<PathBuf>,
    /// EMF endpoint given on the CLI
    pub emf: Option<String>,
    /// Install prebuilt DKMS packages from the EMF repository
    pub dkms: bool,
    /// Print mutating commands instead of running them
    pub dry_run: bool,
    /// Console verbosity
    pub verbosity: u8,
    /// Answer yes to every prompt
    pub assume_yes: bool,
    /// Skip the boot-time service
    pub skip_persistent: bool,
    /// Skip Ethernet tunings
    pub skip_eth_tuning: bool,
    /// Skip Mellanox relaxed ordering
    pub skip_ro_tuning: bool,
    /// Build without o2ib
    pub disable_o2ib: bool,
    /// Directory of the running executable
    pub script_dir: PathBuf,
    /// Host file locations
    pub paths: SystemPaths,
}

impl DeployConfig {
    /// Build a configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        if let Some(n) = args.cpu_npartitions {
            if n == 0 {
                return Err("--npartitions must be greater than 0".to_string());
            }
        }

        let cwd = std::env::current_dir()
            .map_err(|e| format!("Unable to read current directory: {}", e))?;

        let src_file = args.src_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                cwd.join(p)
            }
        });

        let script_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or(cwd);

        Ok(Self {
            install: args.install,
            configure: args.configure,
            remove: args.remove,
            list_mount: args.list_mount,
            lnets: args.lnets.clone().filter(|l| !l.trim().is_empty()),
            cpu_npartitions: args.cpu_npartitions,
            src_file,
            emf: args.emf.clone(),
            dkms: args.dkms,
            dry_run: args.dry_run,
            verbosity: args.verbose,
            assume_yes: args.yes,
            skip_persistent: args.skip_persistent_tuning,
            skip_eth_tuning: args.skip_eth_tuning,
            skip_ro_tuning: args.skip_ro_tuning,
            disable_o2ib: args.disable_o2ib,
            script_dir,
            paths: SystemPaths::default(),
        })
    }

    /// Interactive mode when no action flag was given
    pub fn interactive(&self) -> bool {
        !(self.install || self.configure || self.remove || self.list_mount)
    }

    /// Temporary build directory, next to the executable
    pub fn builddir(&self) -> PathBuf {
        self.script_dir.join("builddir")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let args = CliArgs::parse_from([
            "exa_client_deploy",
            "-i",
            "-c",
            "-l",
            "o2ib0(ib0,ib1)",
            "-n",
            "24",
            "-vv",
            "--dkms",
            "--emf",
            "10.0.0.10",
            "-y",
            "-k",
            "-j",
            "-p",
            "--disable-o2ib",
        ]);
        assert!(args.install && args.configure);
        assert!(!args.remove && !args.list_mount);
        assert_eq!(args.lnets.as_deref(), Some("o2ib0(ib0,ib1)"));
        assert_eq!(args.cpu_npartitions, Some(24));
        assert_eq!(args.verbose, 2);
        assert!(args.dkms && args.yes && args.disable_o2ib);
        assert!(args.skip_eth_tuning && args.skip_ro_tuning && args.skip_persistent_tuning);
        assert_eq!(args.emf.as_deref(), Some("10.0.0.10"));
    }

    #[test]
    fn test_interactive_without_action_flags() {
        let args = CliArgs::parse_from(["exa_client_deploy", "-d"]);
        let config = DeployConfig::from_cli(&args).unwrap();
        assert!(config.interactive());
        assert!(config.dry_run);

        let args = CliArgs::parse_from(["exa_client_deploy", "-m"]);
        assert!(!DeployConfig::from_cli(&args).unwrap().interactive());
    }

    #[test]
    fn test_relative_src_file_made_absolute() {
        let args = CliArgs::parse_from(["exa_client_deploy", "-s", "lustre.tar.gz"]);
        let config = DeployConfig::from_cli(&args).unwrap();
        assert!(config.src_file.unwrap().is_absolute());
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let args = CliArgs::parse_from(["exa_client_deploy", "-c", "-n", "0"]);
        assert!(DeployConfig::from_cli(&args).is_err());
    }

    #[test]
    fn test_paths_under_root() {
        let paths = SystemPaths::under(Path::new("/tmp/root"));
        assert_eq!(
            paths.modprobe_conf,
            PathBuf::from("/tmp/root/etc/modprobe.d/lustre.conf")
        );
        assert_eq!(
            paths.service_unit(),
            PathBuf::from("/tmp/root/opt/ddn/exascaler/systemd/exa-client-deploy.service")
        );
    }
}
