//! Bundled fscrypt and lipe-lpcc packages
//!
//! The installer ships them next to the executable under
//! `<component>/<os tag>/`. Installation is best-effort.

use crate::exec::{CommandSpec, Runner};
use crate::system::{DistroFamily, Platform};
use std::path::{Path, PathBuf};

/// Optional component shipped with the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extra {
    /// Filesystem encryption tool
    Fscrypt,
    /// Lustre persistent client cache
    Lipe,
}

impl Extra {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Fscrypt => "fscrypt",
            Self::Lipe => "lipe",
        }
    }

    fn package_name(&self) -> &'static str {
        match self {
            Self::Fscrypt => "fscrypt",
            Self::Lipe => "lipe-lpcc",
        }
    }

    /// Local install command, `None` when the OS has no build of it
    pub fn install_command(&self, platform: &Platform) -> Option<String> {
        let glob = self.dir_name();
        match platform.family {
            DistroFamily::Ubuntu => Some(format!("apt-get -y install ./{}*.deb", glob)),
            // fscrypt is only packaged for EL8 and later
            DistroFamily::Rhel if *self == Self::Fscrypt && !matches!(platform.distro.major_number(), 8 | 9) => None,
            DistroFamily::Rhel => Some(format!("yum -y localinstall {}*.rpm", glob)),
        }
    }

    /// Directory holding the packages for this OS
    pub fn package_dir(&self, script_dir: &Path, platform: &Platform) -> PathBuf {
        script_dir.join(self.dir_name()).join(platform.distro.extras_tag())
    }
}

/// Install one extra; failure is logged and reported as `false`
pub fn install_extra(runner: &Runner, platform: &Platform, script_dir: &Path, extra: Extra) -> bool {
    let Some(cmd) = extra.install_command(platform) else {
        return true;
    };
    let dir = extra.package_dir(script_dir, platform);
    if !dir.is_dir() && !runner.is_dry_run() {
        println!("{} package not found: {}", extra.package_name(), dir.display());
        tracing::warn!("Unable to install the {} package", extra.package_name());
        return false;
    }

    match runner.apply(CommandSpec::new(cmd).in_dir(&dir)) {
        Ok(out) if out.success() => true,
        _ => {
            tracing::warn!("Unable to install the {} package", extra.package_name());
            false
        }
    }
}

/// Install every extra; returns whether all succeeded
pub fn install_extras(runner: &Runner, platform: &Platform, script_dir: &Path) -> bool {
    [Extra::Fscrypt, Extra::Lipe]
        .into_iter()
        .map(|e| install_extra(runner, platform, script_dir, e))
        .fold(true, |all, ok| all && ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use crate::system::Distribution;
    use tempfile::tempdir;

    fn platform(id: &str, version: &str) -> Platform {
        Platform::new(Distribution::new(id, id, version, ""), "4.18.0-477.el8.x86_64").unwrap()
    }

    #[test]
    fn test_commands_and_dirs() {
        let el7 = platform("centos", "7.9.2009");
        assert_eq!(Extra::Fscrypt.install_command(&el7), None);
        assert_eq!(Extra::Lipe.install_command(&el7).as_deref(), Some("yum -y localinstall lipe*.rpm"));

        let jammy = platform("ubuntu", "22.04");
        assert_eq!(
            Extra::Lipe.package_dir(Path::new("/opt/exa"), &jammy),
            PathBuf::from("/opt/exa/lipe/ubuntu2204")
        );
        assert_eq!(
            Extra::Fscrypt.install_command(&jammy).as_deref(),
            Some("apt-get -y install ./fscrypt*.deb")
        );
    }

    #[test]
    fn test_missing_dir_is_advisory() {
        let dir = tempdir().unwrap();
        let p = platform("rocky", "8.8");
        std::fs::create_dir_all(dir.path().join("lipe/el8")).unwrap();

        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert!(!install_extras(&runner, &p, dir.path()));
        assert!(shell.called("yum -y localinstall lipe*.rpm"));
        assert!(!shell.called("fscrypt"));
    }
}
