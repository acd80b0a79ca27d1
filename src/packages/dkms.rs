//! Prebuilt DKMS client packages served by the EMF repository

use crate::config::SystemPaths;
use crate::error::{DeployError, Result};
use crate::exec::{CommandSpec, Runner};
use crate::system::{DistroFamily, Platform};
use std::path::PathBuf;

/// OS tags with published DKMS packages
pub const SUPPORTED_DKMS_TAGS: &[&str] = &[
    "el79",
    "el85",
    "el86",
    "el87",
    "el88",
    "el91",
    "el92",
    "ubuntu1804",
    "ubuntu2004",
    "ubuntu2204",
];

/// Package repository port on the EMF host
pub const REPO_PORT: u16 = 7080;

/// Fail unless packages are published for this OS
pub fn check_supported(platform: &Platform) -> Result<()> {
    let tag = platform.distro.dkms_tag();
    if SUPPORTED_DKMS_TAGS.contains(&tag.as_str()) {
        return Ok(());
    }
    Err(DeployError::UnsupportedPlatform(format!(
        "Unable to use DKMS packages with current OS version (found {}, must be part of [{}])",
        tag,
        SUPPORTED_DKMS_TAGS.join(", ")
    )))
}

/// Repository definition file and its content
pub fn repo_file(platform: &Platform, paths: &SystemPaths, emf: &str) -> (PathBuf, String) {
    let tag = platform.distro.dkms_tag();
    match platform.family {
        DistroFamily::Ubuntu => (
            paths.apt_source.clone(),
            format!("deb [trusted=yes] http://{}:{}/client/{} ./\n", emf, REPO_PORT, tag),
        ),
        DistroFamily::Rhel => (
            paths.yum_repo.clone(),
            format!(
                "[exa-client]\nname=exa client repo\nbaseurl=http://{}:{}/client/{}/\ngpgcheck=0\n",
                emf, REPO_PORT, tag
            ),
        ),
    }
}

/// Package installation commands
pub fn install_commands(platform: &Platform) -> Vec<CommandSpec> {
    let lines: Vec<String> = match platform.family {
        DistroFamily::Ubuntu => vec![
            "apt update".to_string(),
            "apt install -o DPkg::Options::='--force-confnew' -y lustre-client-utils \
             lustre-client-modules-dkms lustre-dev lipe-lpcc fscrypt"
                .to_string(),
        ],
        DistroFamily::Rhel if matches!(platform.distro.major_number(), 8 | 9) => vec![
            "yum install -y lustre-client lustre-client-dkms lustre-client-devel fscrypt lipe-lpcc"
                .to_string(),
        ],
        DistroFamily::Rhel => vec![
            "yum install -y lustre-client lustre-client-dkms lustre-client-devel lipe-lpcc".to_string(),
        ],
    };
    lines
        .into_iter()
        .map(|l| CommandSpec::new(l).env("DEBIAN_FRONTEND", "noninteractive"))
        .collect()
}

/// Point the package manager at the EMF repository and install
pub fn install(runner: &Runner, platform: &Platform, paths: &SystemPaths, emf: &str) -> Result<()> {
    let (path, content) = repo_file(platform, paths, emf);
    runner.write_file(&path, &content)?;

    println!("\nInstalling EXAScaler dkms client software. This may take a while...");
    for cmd in install_commands(platform) {
        let context = format!("Lustre client installation command failed: {}", cmd.line);
        runner.apply_checked(cmd, &context)?;
    }
    println!("EXAScaler dkms client software packages are installed from {}", emf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use crate::system::Distribution;
    use tempfile::tempdir;

    fn platform(id: &str, version: &str) -> Platform {
        Platform::new(Distribution::new(id, id, version, ""), "5.14.0-284.el9.x86_64").unwrap()
    }

    #[test]
    fn test_whitelist() {
        assert!(check_supported(&platform("rocky", "8.8")).is_ok());
        assert!(check_supported(&platform("ubuntu", "22.04")).is_ok());
        let err = check_supported(&platform("rhel", "9.3")).unwrap_err();
        assert!(err.to_string().contains("found el93"));
    }

    #[test]
    fn test_repo_files() {
        let paths = SystemPaths::default();
        let (path, content) = repo_file(&platform("ubuntu", "20.04"), &paths, "10.0.0.10");
        assert_eq!(path, PathBuf::from("/etc/apt/sources.list.d/exascaler-client.list"));
        assert_eq!(content, "deb [trusted=yes] http://10.0.0.10:7080/client/ubuntu2004 ./\n");

        let (path, content) = repo_file(&platform("almalinux", "8.6"), &paths, "emf");
        assert_eq!(path, PathBuf::from("/etc/yum.repos.d/exascaler-client.repo"));
        assert!(content.starts_with("[exa-client]\n"));
        assert!(content.contains("baseurl=http://emf:7080/client/el86/\n"));
        assert!(content.contains("gpgcheck=0"));
    }

    #[test]
    fn test_install_commands() {
        let cmds = install_commands(&platform("centos", "7.9.2009"));
        assert_eq!(cmds.len(), 1);
        assert!(!cmds[0].line.contains("fscrypt"));

        let cmds = install_commands(&platform("rocky", "9.2"));
        assert!(cmds[0].line.contains("fscrypt"));
    }

    #[test]
    fn test_install_writes_repo() {
        let dir = tempdir().unwrap();
        let paths = SystemPaths::under(dir.path());
        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), false);

        install(&runner, &platform("ubuntu", "22.04"), &paths, "10.0.0.10").unwrap();
        assert!(std::fs::read_to_string(&paths.apt_source).unwrap().contains("ubuntu2204"));
        assert_eq!(shell.calls()[0], "apt update");
    }
}
