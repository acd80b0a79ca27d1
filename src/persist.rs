//! Boot-time persistence of the client configuration
//!
//! A copy of this tool and a oneshot systemd unit are installed under the
//! installation root. At boot the unit re-runs configure with the same LNets
//! and tuning choices before `lnet.service` starts.

use crate::config::SystemPaths;
use crate::error::{DeployError, Result};
use crate::exec::Runner;
use crate::network::LnetSpec;
use std::path::Path;

/// Unit name, as given to `systemctl`
pub const SERVICE_NAME: &str = "exa-client-deploy";

/// Choices re-applied by the boot-time configure
#[derive(Debug, Clone)]
pub struct PersistOptions<'a> {
    /// LNets to configure
    pub lnets: &'a LnetSpec,
    /// Ethernet tunings skipped
    pub skip_eth_tuning: bool,
    /// Relaxed ordering skipped
    pub skip_ro_tuning: bool,
    /// libcfs CPU partitions
    pub cpu_npartitions: Option<u32>,
}

/// `ExecStart` command line
pub fn exec_start(binary: &Path, opts: &PersistOptions<'_>) -> String {
    let mut line = format!("{} -c -l \"{}\" --yes", binary.display(), opts.lnets);
    if opts.skip_eth_tuning {
        line.push_str(" --skip-eth-tuning");
    }
    if opts.skip_ro_tuning {
        line.push_str(" --skip-ro-tuning");
    }
    if let Some(n) = opts.cpu_npartitions {
        line.push_str(&format!(" -n {}", n));
    }
    line
}

/// Unit file content
pub fn render_unit(binary: &Path, opts: &PersistOptions<'_>) -> String {
    format!(
        "[Unit]
Description=Configure EXA Interfaces
After=network.target network-online.target openibd.service
Before=lnet.service

[Service]
Type=oneshot
RemainAfterExit=true
ExecStart={}

[Install]
WantedBy=default.target
",
        exec_start(binary, opts)
    )
}

/// Install the tool copy and enable the unit.
///
/// Returns `false` when persistence could not be set up; the configure
/// result itself is unaffected.
pub fn setup(runner: &Runner, paths: &SystemPaths, opts: &PersistOptions<'_>) -> bool {
    if !runner.has_tool("systemctl") {
        tracing::warn!("systemctl isn't available, persistency skipped");
        return false;
    }
    match install_unit(runner, paths, opts) {
        Ok(true) => {
            println!(
                "Persistency enabled (see {})\n\
                 $ systemctl restart {name} # Restart\n\
                 $ systemctl status  {name} # Status\n\
                 $ systemctl disable {name} # Disable\n",
                paths.service_unit().display(),
                name = SERVICE_NAME
            );
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::warn!("Persistency setup failed: {}", e);
            false
        }
    }
}

fn install_unit(runner: &Runner, paths: &SystemPaths, opts: &PersistOptions<'_>) -> Result<bool> {
    let systemd_dir = paths.systemd_dir();
    if !systemd_dir.exists() {
        tracing::info!("Create a directory for systemd service in {}", systemd_dir.display());
        runner.create_dir_all(&systemd_dir)?;
    }

    let binary = paths.installed_binary();
    let current = std::env::current_exe().map_err(|e| DeployError::io("<current executable>", e))?;
    if current != binary {
        runner.copy_file(&current, &binary)?;
    }

    if !runner.apply(format!("chmod +x {}", binary.display()))?.success() {
        tracing::warn!(
            "Failed to add execution permission to {}, {} service may malfunction",
            binary.display(),
            SERVICE_NAME
        );
    }

    let unit = paths.service_unit();
    let content = render_unit(&binary, opts);
    tracing::info!("Write {}\n{}", unit.display(), content);
    runner.write_file(&unit, &content)?;

    let out = runner.apply(format!("systemctl enable {}", unit.display()))?;
    if !out.success() {
        tracing::warn!("Can't enable service {}", unit.display());
        return Ok(false);
    }
    Ok(true)
}
