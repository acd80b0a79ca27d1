//! Host changes of each action

use super::{Action, Deployer};
use crate::emf::{format_mount_line, EmfClient};
use crate::error::{DeployError, Result};
use crate::lustre::{self, service, ModprobeConf};
use crate::network::{configure_multirail, wait_for_address, EthTuner};
use crate::packages::{dkms, extras, prepare_build_env, LustreBuild};
use crate::persist::{self, PersistOptions};

impl<'a> Deployer<'a> {
    /// Apply a validated action
    pub fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Check => {
                self.check();
                Ok(())
            }
            Action::Install => self.install(),
            Action::Configure => self.configure(),
            Action::Remove => self.remove(),
            Action::ListMount => {
                self.list_mount();
                Ok(())
            }
            Action::Exit => Ok(()),
        }
    }

    /// `dpkg -l` lines captured before the last install or removal
    pub fn debs_snapshot(&self) -> &[String] {
        &self.debs_snapshot
    }

    fn check(&self) {
        tracing::info!("Checking if DDN EXAScaler client software packages are installed.");
        let pm = self.package_manager();
        let packages = pm.installed_client_packages();
        if packages.is_empty() {
            println!("EXAScaler client software packages are not installed\n");
            return;
        }

        if service::module_matches_kernel(self.runner, &self.platform.kernel) == Some(false) {
            tracing::warn!("EXAScaler module doesn't match current kernel");
            println!("WARNING: EXAScaler module doesn't match current kernel");
        }

        let version = if self.platform.is_ubuntu() {
            pm.installed_version(&packages[0])
        } else {
            None
        };
        match version {
            Some(v) => println!("Found installed EXAScaler client software packages version {}:\n", v),
            None => println!("Found installed EXAScaler client software packages:\n"),
        }
        for package in &packages {
            println!("{}", package);
        }
    }

    fn install(&mut self) -> Result<()> {
        let pm = self.package_manager();
        if self.platform.is_ubuntu() {
            self.debs_snapshot = pm.snapshot();
        }
        if !pm.remove(&[]) {
            tracing::warn!("Unable to remove temporary packages");
        }

        let paths = &self.config.paths;
        prepare_build_env(self.runner, &self.platform, paths, self.config.dkms)?;

        if self.config.dkms {
            let emf = self
                .config
                .emf
                .as_deref()
                .ok_or_else(|| DeployError::validation("DKMS packages requires --emf option"))?;
            dkms::install(self.runner, &self.platform, paths, emf)?;
        } else {
            let source = self
                .source
                .clone()
                .ok_or_else(|| DeployError::validation("Can't find client archive. Exiting."))?;
            LustreBuild::new(
                self.runner,
                &self.platform,
                paths,
                self.config.builddir(),
                self.mofed_installed,
                self.config.disable_o2ib,
            )
            .run(&source)?;

            if !extras::install_extras(self.runner, &self.platform, &self.config.script_dir) {
                tracing::warn!("Some optional packages could not be installed");
            }
        }

        if !self.config.configure {
            println!("Use option 3 to configure EXAScaler client software before loading lustre module\n");
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let lnets = self
            .lnets
            .clone()
            .ok_or_else(|| DeployError::validation("Please specify LNets"))?;

        for nic in &self.nics {
            let ready = wait_for_address(nic, self.address_timeout, self.address_poll, |n| {
                (self.lookup)(n).is_some()
            });
            if !ready {
                return Err(DeployError::validation(format!(
                    "Network interface {} doesn't have IP address configured. Aborting...",
                    nic
                )));
            }
        }

        lustre::stop(self.runner)?;

        let paths = &self.config.paths;
        if self.nics.len() > 1 {
            configure_multirail(self.runner, paths, &self.nics, |n| (self.lookup)(n))?;
        }

        let mut tuner = EthTuner::new(
            self.runner,
            self.prompter,
            self.skip_eth_tuning,
            self.skip_ro_tuning,
        );
        if !tuner.tune(&self.nics)? {
            tracing::warn!("Some Ethernet tunings have failed, please see A3I documentation");
        }
        self.skip_eth_tuning = tuner.skip_eth();
        self.skip_ro_tuning = tuner.skip_ro();

        let mut conf = ModprobeConf::load(&paths.modprobe_conf)?;
        conf.merge_client_defaults(&lnets.networks_value(), self.cpu_npartitions);
        conf.save(self.runner, &paths.modprobe_conf)?;

        lustre::configure_lnet_conf(self.runner, &paths.lnet_conf)?;
        println!("\nEXAScaler client software is configured\n");

        if !self.config.skip_persistent {
            let opts = PersistOptions {
                lnets: &lnets,
                skip_eth_tuning: self.skip_eth_tuning,
                skip_ro_tuning: self.skip_ro_tuning,
                cpu_npartitions: self.cpu_npartitions,
            };
            if !persist::setup(self.runner, paths, &opts) {
                tracing::warn!("Setup persistency has failed");
            }
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        lustre::stop(self.runner)?;
        tracing::info!("Removing lustre packages...");

        let pm = self.package_manager();
        if self.platform.is_ubuntu() {
            self.debs_snapshot = pm.snapshot();
        }
        let packages = pm.installed_client_packages();
        if !pm.remove(&packages) {
            tracing::warn!("Some lustre packages could not be removed");
        }
        println!("\nEXAScaler client software packages are removed\n");
        Ok(())
    }

    fn list_mount(&self) {
        let Some(ref host) = self.emf_endpoint else {
            tracing::warn!("Can't connect to emf api. Aborting...");
            return;
        };
        match EmfClient::new(self.runner, host.as_str()).mount_commands() {
            Ok(mounts) if mounts.is_empty() => {
                tracing::warn!("Can't retrieve mount commands from emf api. Aborting...");
            }
            Ok(mounts) => {
                println!("\n");
                for (fs, cmd) in mounts {
                    println!("{}", format_mount_line(&fs, &cmd));
                }
            }
            Err(e) => {
                tracing::warn!("An error occured while retrieving info from emf api: {}", e);
            }
        }
    }
}
