//! Deploy procedure
//!
//! The procedure is a choice among a handful of [`Action`]s, picked from an
//! interactive menu or from the CLI flags. Each action is validated first,
//! so that no host change happens for a request that cannot succeed, then
//! applied.
//!
//! ## Session state
//!
//! [`DeployConfig`] holds the operator's inputs and never changes. What the
//! procedure learns along the way (resolved LNets, DGX model, MOFED
//! presence, declined tunings) lives in the [`Deployer`].

mod apply;
mod validate;

use crate::config::{DeployConfig, VERSION};
use crate::error::Result;
use crate::exec::Runner;
use crate::network::{ipv4_config, Ipv4Config, LnetSpec, ADDRESS_POLL, ADDRESS_TIMEOUT};
use crate::prompt::Prompter;
use crate::system::{kernel, DgxModel, DistroDetector, Platform};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Interactive menu
pub const MENU: &str = "
1) Check if DDN EXAScaler client software is installed
2) Install DDN EXAScaler client software
3) Configure DDN EXAScaler client software
4) Remove DDN EXAScaler client software
5) List DDN EXAScaler mount commands
6) Exit
";

/// What the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Report installed packages
    Check,
    /// Build or download, and install the client
    Install,
    /// Configure LNet, tunings and persistence
    Configure,
    /// Remove the client packages
    Remove,
    /// Print mount commands from EMF
    ListMount,
    /// Leave the menu
    Exit,
}

impl Action {
    /// Action for a menu answer
    pub fn from_choice(choice: &str) -> Option<Self> {
        match choice.trim() {
            "1" => Some(Self::Check),
            "2" => Some(Self::Install),
            "3" => Some(Self::Configure),
            "4" => Some(Self::Remove),
            "5" => Some(Self::ListMount),
            "6" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Actions requested by the CLI flags, in execution order
    pub fn from_config(config: &DeployConfig) -> Vec<Self> {
        [
            (config.install, Self::Install),
            (config.configure, Self::Configure),
            (config.remove, Self::Remove),
            (config.list_mount, Self::ListMount),
        ]
        .into_iter()
        .filter_map(|(wanted, action)| wanted.then_some(action))
        .collect()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Check => "check",
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Remove => "remove",
            Self::ListMount => "list-mount",
            Self::Exit => "exit",
        };
        write!(f, "{}", name)
    }
}

/// Whether the procedure goes on after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Go on
    Continue,
    /// Nothing left to do; leave with success
    Stop,
}

/// Detect the platform and confirm an unsupported kernel.
///
/// `Ok(None)` when the operator declined to go on.
pub fn detect_platform(
    runner: &Runner,
    prompter: &Prompter,
    config: &DeployConfig,
) -> Result<Option<Platform>> {
    let distro = DistroDetector::new(runner, &config.paths).detect()?;
    tracing::info!(
        "Detected {} {} ({})",
        distro.name,
        distro.version,
        distro.codename
    );
    let platform = Platform::new(distro, kernel::running_kernel()?)?;

    if !platform.kernel_supported() {
        let question = format!(
            "\nThe tool is not supported on the kernel {}\nDo you want to continue",
            platform.kernel
        );
        if !prompter.confirm(&question, true)? {
            return Ok(None);
        }
    }
    Ok(Some(platform))
}

type AddressLookup<'a> = Box<dyn Fn(&str) -> Option<Ipv4Config> + 'a>;

/// Runs the deploy procedure on one host
pub struct Deployer<'a> {
    config: &'a DeployConfig,
    runner: &'a Runner,
    prompter: &'a Prompter,
    platform: Platform,
    lookup: AddressLookup<'a>,
    address_timeout: Duration,
    address_poll: Duration,

    lnets: Option<LnetSpec>,
    nics: Vec<String>,
    dgx: Option<DgxModel>,
    dgx_probed: bool,
    mofed_installed: bool,
    cpu_npartitions: Option<u32>,
    skip_eth_tuning: bool,
    skip_ro_tuning: bool,
    source: Option<PathBuf>,
    emf_endpoint: Option<String>,
    debs_snapshot: Vec<String>,
    clean_builddir: bool,
}

impl<'a> Deployer<'a> {
    /// Create a deployer for a detected platform
    pub fn new(
        config: &'a DeployConfig,
        runner: &'a Runner,
        prompter: &'a Prompter,
        platform: Platform,
    ) -> Self {
        Self {
            config,
            runner,
            prompter,
            platform,
            lookup: Box::new(ipv4_config),
            address_timeout: ADDRESS_TIMEOUT,
            address_poll: ADDRESS_POLL,
            lnets: None,
            nics: Vec::new(),
            dgx: None,
            dgx_probed: false,
            mofed_installed: false,
            cpu_npartitions: config.cpu_npartitions,
            skip_eth_tuning: config.skip_eth_tuning,
            skip_ro_tuning: config.skip_ro_tuning,
            source: None,
            emf_endpoint: None,
            debs_snapshot: Vec::new(),
            clean_builddir: false,
        }
    }

    /// Resolve interface addresses with `lookup` instead of the host
    pub fn with_address_lookup(mut self, lookup: impl Fn(&str) -> Option<Ipv4Config> + 'a) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// How long to wait for interface addresses
    pub fn with_address_wait(mut self, timeout: Duration, poll: Duration) -> Self {
        self.address_timeout = timeout;
        self.address_poll = poll;
        self
    }

    /// Detected platform
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// LNets resolved by configure
    pub fn lnets(&self) -> Option<&LnetSpec> {
        self.lnets.as_ref()
    }

    /// Run the menu loop, or the actions requested on the CLI
    pub fn run(&mut self) -> Result<()> {
        if !self.config.interactive() {
            for action in Action::from_config(self.config) {
                if self.execute(action, false)? == Flow::Stop {
                    break;
                }
            }
            return Ok(());
        }

        loop {
            let action = self.menu()?;
            if action == Action::Exit {
                tracing::info!("Exit requested");
                return Ok(());
            }
            if self.execute(action, true)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    /// Validate then apply one action
    pub fn execute(&mut self, action: Action, interactive: bool) -> Result<Flow> {
        tracing::info!("Running {} action", action);
        if self.validate(action, interactive)? == Flow::Stop {
            return Ok(Flow::Stop);
        }
        let result = self.apply(action);
        if result.is_err() {
            // keep the build tree around for debugging
            self.clean_builddir = false;
        }
        result.map(|_| Flow::Continue)
    }

    fn menu(&self) -> Result<Action> {
        println!(
            "\nDDN EXAScaler client software installation tool: Version {}",
            VERSION
        );
        println!("Select an option:");
        loop {
            let answer = self.prompter.input(MENU)?;
            match Action::from_choice(&answer) {
                Some(action) => return Ok(action),
                None => println!("Unsupported choice specified."),
            }
        }
    }

    /// Remove the build directory unless a build failed
    pub fn clean(&self) {
        tracing::info!("Perform custom cleaning procedure.");
        if self.clean_builddir {
            if let Err(e) = self.runner.remove_dir_all(&self.config.builddir()) {
                tracing::warn!("Unable to remove the build directory: {}", e);
            }
        }
    }
}
