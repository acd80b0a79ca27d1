//! Build environment preparation
//!
//! Installs the toolchain, kernel headers and library headers needed to
//! build the client. Packages shipped in optional repositories are tried
//! through a chain of repository variants joined with `||`.

use super::lists::{DEVELOPMENT_TOOLS_RHEL, DEVELOPMENT_TOOLS_UBUNTU, UBUNTU_2X_EXTRAS};
use super::PackageManager;
use crate::config::SystemPaths;
use crate::error::{DeployError, Result};
use crate::exec::{CommandSpec, Runner};
use crate::system::{kernel, DistroFamily, Platform};

const YUM: &str = "yum -y";

/// `yum install <pkg>` tried against each repository option in turn, then
/// with the default repositories
fn repo_chain(pkg: &str, repo_options: &[String]) -> String {
    repo_options
        .iter()
        .map(|opt| format!("{} {} install {}", YUM, opt, pkg))
        .chain(std::iter::once(format!("{} install {}", YUM, pkg)))
        .collect::<Vec<_>>()
        .join(" || ")
}

fn apt_install(packages: &[&str]) -> CommandSpec {
    CommandSpec::new(format!("apt-get -y install {}", packages.join(" ")))
        .env("DEBIAN_FRONTEND", "noninteractive")
}

/// Commands preparing the build environment, in execution order.
///
/// `installed` answers whether a package is already present; RHEL fallback
/// chains are only added for missing packages.
pub fn build_env_commands(
    platform: &Platform,
    paths: &SystemPaths,
    dkms: bool,
    installed: impl Fn(&str) -> bool,
) -> Vec<CommandSpec> {
    let mut cmds = Vec::new();
    let major = platform.distro.major_number();
    let kernel = &platform.kernel;

    match platform.family {
        DistroFamily::Ubuntu => {
            if dkms {
                cmds.push(CommandSpec::new(format!("rm -f {}", paths.apt_source.display())));
            }
            cmds.push(CommandSpec::new("apt-get update").env("DEBIAN_FRONTEND", "noninteractive"));
            cmds.push(apt_install(&["apt-utils"]));
            cmds.push(apt_install(DEVELOPMENT_TOOLS_UBUNTU));
            if major >= 20 {
                cmds.push(apt_install(UBUNTU_2X_EXTRAS));
            }
            cmds.push(apt_install(&[&format!("linux-headers-{}", kernel)]));
            cmds.push(apt_install(&["linux-headers-generic"]));
        }
        DistroFamily::Rhel => {
            if dkms {
                cmds.push(CommandSpec::new(format!("rm -f {}", paths.yum_repo.display())));
            }
            cmds.push(CommandSpec::new(format!("{} group install \"Development Tools\"", YUM)));

            if matches!(major, 8 | 9) && !installed("libyaml-devel") {
                let opts: Vec<String> = [
                    "powertools".to_string(),
                    "PowerTools".to_string(),
                    "crb".to_string(),
                    format!("codeready-builder-for-rhel-{}-x86_64-rpms", major),
                ]
                .iter()
                .map(|r| format!("--disablerepo=* --enablerepo={}", r))
                .collect();
                cmds.push(CommandSpec::new(repo_chain("libyaml-devel", &opts)));
            }

            if matches!(major, 8 | 9) && !installed("libmount-devel") {
                let opts: Vec<String> = [
                    "powertools",
                    "PowerTools",
                    "AppStream",
                    "codeready-builder-for-rhel-8-x86_64-rpms",
                    "rhel-9-for-x86_64-appstream-rpms",
                ]
                .iter()
                .map(|r| format!("--enablerepo={}", r))
                .collect();
                cmds.push(CommandSpec::new(repo_chain("libmount-devel", &opts)));
            }

            if major == 9 && !installed("json-c-devel") {
                let opts: Vec<String> = [
                    "crb",
                    "rhel-8-for-x86_64-appstream-rpms",
                    "codeready-builder-for-rhel-9-x86_64-rpms",
                ]
                .iter()
                .map(|r| format!("--enablerepo={}", r))
                .collect();
                cmds.push(CommandSpec::new(repo_chain("json-c-devel", &opts)));
            }

            if !installed("epel-release") {
                cmds.push(CommandSpec::new(format!(
                    "{yum} install https://dl.fedoraproject.org/pub/epel/epel-release-latest-{major}.noarch.rpm \
                     || {yum} install epel-release",
                    yum = YUM,
                    major = platform.distro.major(),
                )));
            }

            cmds.push(CommandSpec::new(format!(
                "{} install {} kernel-devel-{}",
                YUM,
                DEVELOPMENT_TOOLS_RHEL.join(" "),
                kernel
            )));
            // may fail; the header check below decides
            cmds.push(CommandSpec::new(format!("{} install kernel-headers-{} || true", YUM, kernel)));

            if major == 9 {
                cmds.push(CommandSpec::new(format!("{} install kernel-abi-stablelists", YUM)));
            } else {
                cmds.push(CommandSpec::new(format!("{} install kernel-abi-whitelists python2", YUM)));
            }
        }
    }

    cmds
}

/// Kernel header versions known to yum: available ones plus installed ones
pub fn kernel_header_versions(runner: &Runner) -> Vec<String> {
    let mut versions = Vec::new();
    if let Ok(out) = runner.query("yum list \"kernel-headers\"") {
        if out.success() {
            versions.extend(kernel::parse_yum_available(&out.output));
        }
    }
    if let Ok(out) = runner.query("rpm -q kernel-headers") {
        if out.success() {
            versions.extend(out.output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string));
        }
    }
    versions
}

/// Fail unless headers matching the running kernel can be installed
pub fn check_rhel_kernel_headers(runner: &Runner, release: &str) -> Result<()> {
    let available = kernel_header_versions(runner);
    if kernel::headers_match(release, &available)? {
        return Ok(());
    }
    Err(DeployError::validation(format!(
        "Headers can't be found for running kernel {}.\nFound headers available for {}. \
         Please update your kernel or install manually your running kernel headers",
        release,
        available.join(" ")
    )))
}

/// Install the build environment; any failed step is fatal
pub fn prepare_build_env(
    runner: &Runner,
    platform: &Platform,
    paths: &SystemPaths,
    dkms: bool,
) -> Result<()> {
    println!("Preparing build environment...");
    let pm = PackageManager::new(runner, platform.family);

    for cmd in build_env_commands(platform, paths, dkms, |p| pm.is_installed(p)) {
        let line = cmd.line.clone();
        runner.apply_checked(
            cmd,
            &format!("Unable to prepare build environment. Failed command: {}", line),
        )?;
    }

    if platform.family == DistroFamily::Rhel {
        check_rhel_kernel_headers(runner, &platform.kernel)?;
    }
    println!("Preparing build environment... Done");
    Ok(())
}
