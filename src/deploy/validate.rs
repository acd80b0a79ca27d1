//! Preconditions of each action, checked before anything changes
//!
//! Validation may prompt the operator and records what it resolves (LNets,
//! source, DGX model) on the deployer for the apply phase.

use super::{Action, Deployer, Flow};
use crate::emf;
use crate::error::{DeployError, Result};
use crate::lustre;
use crate::network::{default_lnet, LnetSpec};
use crate::packages::{dkms, PackageManager, SourceCandidates};
use crate::system::{detect_dgx, DgxModel};

impl<'a> Deployer<'a> {
    pub(super) fn package_manager(&self) -> PackageManager<'a> {
        PackageManager::new(self.runner, self.platform.family)
    }

    pub(super) fn dgx(&mut self) -> Option<DgxModel> {
        if !self.dgx_probed {
            self.dgx = detect_dgx(self.runner);
            self.dgx_probed = true;
            if let Some(model) = self.dgx {
                tracing::info!("{} system detected", model);
            }
        }
        self.dgx
    }

    /// Check the preconditions of `action`
    pub fn validate(&mut self, action: Action, interactive: bool) -> Result<Flow> {
        if self.config.install && self.config.remove {
            return Err(DeployError::validation(
                "Install (-i) & Remove (-r) options cannot be specified together",
            ));
        }
        if self.config.configure && self.config.remove {
            return Err(DeployError::validation(
                "Configure (-c) & Remove (-r) options cannot be specified together",
            ));
        }

        match action {
            Action::Check | Action::Exit => Ok(Flow::Continue),
            Action::Install => self.validate_install(interactive),
            Action::Configure => self.validate_configure(interactive),
            Action::Remove => self.validate_remove(),
            Action::ListMount => self.validate_list_mount(interactive),
        }
    }

    fn validate_install(&mut self, interactive: bool) -> Result<Flow> {
        let pm = self.package_manager();
        if !pm.installed_client_packages().is_empty() {
            let message =
                "EXAScaler client software packages are already installed. Use --remove to remove first";
            if !self.runner.is_dry_run() {
                return Err(DeployError::validation(message));
            }
            tracing::warn!("{}", message);
        }

        self.mofed_installed = false;
        if !self.config.disable_o2ib {
            self.mofed_installed = pm.mofed_installed();
            if !self.mofed_installed {
                println!(
                    "\nMellanox OFED is not installed. Lustre will be built against in-kernel IB stack."
                );
                if !self.prompter.confirm("Do you want to continue", true)? {
                    return Err(DeployError::Aborted(self.mofed_hint().to_string()));
                }
            }
        }

        if let Some(ref host) = self.config.emf {
            if !self.runner.query(format!("ping -c 3 {}", host))?.success() {
                return Err(DeployError::validation(format!("Can't ping {}. Aborting...", host)));
            }
        }

        self.dgx();
        self.make_builddir()?;

        if self.config.dkms {
            if self.config.emf.is_none() {
                return Err(DeployError::validation("DKMS packages requires --emf option"));
            }
            dkms::check_supported(&self.platform)?;
            return Ok(Flow::Continue);
        }

        let source = match self.config.src_file {
            Some(ref path) if path.exists() => path.clone(),
            Some(ref path) => {
                return Err(DeployError::validation(format!("{} does not exist", path.display())))
            }
            None => SourceCandidates::new(&self.config.script_dir, &self.config.paths)
                .resolve(self.prompter, interactive)?,
        };
        self.source = Some(source);
        Ok(Flow::Continue)
    }

    fn mofed_hint(&self) -> &'static str {
        if self.platform.is_ubuntu() {
            "Install Mellanox OFED with mlnxofedinstall available in installer package \
             or install mlnx-ofed-kernel-dkms package."
        } else {
            "Install Mellanox OFED with mlnxofedinstall available in installer package \
             or install mlnx-ofa_kernel, kmod-mlnx-ofa_kernel and mlnx-ofa_kernel-devel packages."
        }
    }

    fn make_builddir(&mut self) -> Result<()> {
        let builddir = self.config.builddir();
        tracing::info!("Temporary directory path is '{}'", builddir.display());
        self.runner.remove_dir_all(&builddir)?;
        self.runner.create_dir_all(&builddir)?;
        let root = &self.config.paths.install_root;
        if !root.exists() {
            tracing::info!("Create a directory for final packages in {}", root.display());
            self.runner.create_dir_all(root)?;
        }
        self.clean_builddir = true;
        Ok(())
    }

    fn validate_configure(&mut self, interactive: bool) -> Result<Flow> {
        if self.package_manager().installed_client_packages().is_empty() {
            let message =
                "EXAScaler client software packages are not installed. Use --install to install first";
            if !self.runner.is_dry_run() {
                return Err(DeployError::validation(message));
            }
            tracing::warn!("{}", message);
        }
        lustre::ensure_not_mounted(self.runner)?;

        let raw = match self.config.lnets {
            Some(ref lnets) => lnets.clone(),
            None => self.prompt_lnets(interactive)?,
        };
        let spec = LnetSpec::parse(&raw)?;
        spec.validate_interfaces(&self.config.paths.sys_class_net)?;
        self.nics = spec.interfaces();
        self.lnets = Some(spec);

        if self.cpu_npartitions.is_none() {
            if let Some(model) = self.dgx() {
                self.cpu_npartitions = Some(self.prompt_partitions(model.cpu_npartitions(), interactive)?);
            }
        }
        Ok(Flow::Continue)
    }

    fn prompt_lnets(&self, interactive: bool) -> Result<String> {
        let default = default_lnet(self.runner);
        let mut answer = String::new();
        if interactive {
            let question = match default {
                Some(ref d) => format!("Specify LNets (semicolon separated) - default [{}]: ", d),
                None => "Specify LNets (semicolon separated) - e.g. [o2ib(ens1,ens2)]: ".to_string(),
            };
            answer = self.prompter.input(&question)?;
        }
        if !answer.is_empty() {
            return Ok(answer);
        }
        default.ok_or_else(|| DeployError::validation("Please specify LNets"))
    }

    fn prompt_partitions(&self, default: u32, interactive: bool) -> Result<u32> {
        if !interactive {
            return Ok(default);
        }
        loop {
            let answer = self
                .prompter
                .input(&format!("Specify cpu_npartitions - [{}]: ", default))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match answer.parse::<u32>() {
                Ok(n) if n > 0 => return Ok(n),
                _ => println!("cpu_npartitions must be a positive number"),
            }
        }
    }

    fn validate_remove(&mut self) -> Result<Flow> {
        if self.package_manager().installed_client_packages().is_empty() {
            println!("\nEXAScaler client software packages are not installed, nothing to do\n");
            return Ok(Flow::Stop);
        }
        let mounts = lustre::mounts(self.runner)?;
        if !mounts.is_empty() {
            println!("Unmounting the lustre filesystem to proceed");
            lustre::unmount_all(self.runner, &mounts)?;
            lustre::stop(self.runner)?;
        }
        Ok(Flow::Continue)
    }

    fn validate_list_mount(&mut self, interactive: bool) -> Result<Flow> {
        let endpoint = emf::discover(
            self.runner,
            self.prompter,
            self.config.emf.as_deref(),
            interactive,
        )?;
        match endpoint {
            Some(host) => {
                self.emf_endpoint = Some(host);
                Ok(Flow::Continue)
            }
            None => Err(DeployError::Emf("Can't connect to emf api. Aborting...".to_string())),
        }
    }
}
