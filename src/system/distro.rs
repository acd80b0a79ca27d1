//! Linux distribution detection
//!
//! Strategies are tried in a fixed order, each falling through to the next:
//!
//! 1. `lsb_release` probe (a Debian answer is not trusted: on unpatched
//!    Ubuntu it reports the parent distribution)
//! 2. os-release files
//! 3. `lsb_release` again after installing it with the host package manager
//! 4. legacy release files (`/etc/redhat-release`, `/etc/lsb-release`, ...)

use crate::config::SystemPaths;
use crate::error::{DeployError, Result};
use crate::exec::Runner;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Distribution ids handled as RHEL
pub const RHEL_DISTROS: &[&str] = &["rhel", "redhat", "centos", "almalinux", "rocky"];

static LEGACY_RELEASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+?) release (?P<version>[0-9][0-9.]*)\s*(?:\((?P<codename>[^)]*)\))?")
        .expect("Invalid release file regex")
});

/// Distribution family driving package and build choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistroFamily {
    /// Ubuntu (apt, debs)
    Ubuntu,
    /// RHEL and rebuilds (yum, rpms)
    Rhel,
}

impl DistroFamily {
    /// Family of a distribution id
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.to_lowercase();
        if id == "ubuntu" {
            Some(Self::Ubuntu)
        } else if RHEL_DISTROS.contains(&id.as_str()) {
            Some(Self::Rhel)
        } else {
            None
        }
    }

    /// Package format directory name under the install root
    pub fn package_dir(&self) -> &'static str {
        match self {
            Self::Ubuntu => "debs",
            Self::Rhel => "rpms",
        }
    }
}

/// Detected distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    /// Short lowercase id (`ubuntu`, `rocky`, ...)
    pub id: String,
    /// Full name (`Ubuntu`, `Rocky Linux`, ...)
    pub name: String,
    /// Version (`22.04`, `8.8`, ...)
    pub version: String,
    /// Codename, possibly empty
    pub codename: String,
}

impl Distribution {
    /// Create a distribution record
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        codename: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().to_lowercase(),
            name: name.into(),
            version: version.into(),
            codename: codename.into(),
        }
    }

    /// Family, if supported
    pub fn family(&self) -> Option<DistroFamily> {
        DistroFamily::from_id(&self.id)
    }

    /// Major version component
    pub fn major(&self) -> &str {
        self.version.split('.').next().unwrap_or("")
    }

    /// Minor version component
    pub fn minor(&self) -> &str {
        self.version.split('.').nth(1).unwrap_or("")
    }

    /// Major version as a number (0 when not numeric)
    pub fn major_number(&self) -> u32 {
        self.major().parse().unwrap_or(0)
    }

    /// Tag of the prebuilt DKMS repository (`el88`, `ubuntu2204`)
    pub fn dkms_tag(&self) -> String {
        match self.family() {
            Some(DistroFamily::Rhel) => format!("el{}{}", self.major(), self.minor()),
            _ => {
                let digits: String = self.version.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
                format!("{}{}", self.id, digits).to_lowercase()
            }
        }
    }

    /// Directory tag of the bundled extra packages (`el8`, `ubuntu2204`)
    pub fn extras_tag(&self) -> String {
        match self.family() {
            Some(DistroFamily::Rhel) => format!("el{}", self.major()),
            _ => format!("ubuntu{}04", self.major()),
        }
    }
}

/// Parse `lsb_release -s -i -r -c` output (id, release, codename lines)
pub fn parse_lsb_release(output: &str) -> Option<Distribution> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let raw_id = lines.next()?;
    let version = lines.next()?;
    let codename = lines.next().unwrap_or("");

    let id = normalize_id(raw_id);
    Some(Distribution::new(id, raw_id, version, codename))
}

/// Parse os-release key/value content
pub fn parse_os_release(content: &str) -> Option<Distribution> {
    let fields: HashMap<&str, String> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'').to_string()))
        .collect();

    let id = fields.get("ID")?;
    let version = fields.get("VERSION_ID")?;
    let name = fields.get("NAME").cloned().unwrap_or_else(|| id.clone());

    let codename = fields
        .get("VERSION_CODENAME")
        .filter(|c| !c.is_empty())
        .cloned()
        .or_else(|| {
            fields.get("VERSION").and_then(|v| {
                let start = v.find('(')?;
                let end = v[start..].find(')')? + start;
                Some(v[start + 1..end].to_string())
            })
        })
        .unwrap_or_default();

    Some(Distribution::new(id.as_str(), name, version.as_str(), codename))
}

/// Parse a legacy release file (`/etc/redhat-release` or `/etc/lsb-release`)
pub fn parse_legacy_release(content: &str) -> Option<Distribution> {
    if content.contains("DISTRIB_ID=") {
        let get = |key: &str| {
            content
                .lines()
                .find_map(|l| l.strip_prefix(key))
                .map(|v| v.trim().trim_matches('"').to_string())
        };
        let raw_id = get("DISTRIB_ID=")?;
        let version = get("DISTRIB_RELEASE=")?;
        let codename = get("DISTRIB_CODENAME=").unwrap_or_default();
        return Some(Distribution::new(normalize_id(&raw_id), raw_id, version, codename));
    }

    let caps = LEGACY_RELEASE_REGEX.captures(content.lines().next()?.trim())?;
    let name = caps.name("name")?.as_str().to_string();
    let version = caps.name("version")?.as_str();
    let codename = caps.name("codename").map(|m| m.as_str()).unwrap_or("");

    Some(Distribution::new(normalize_id(&name), name.clone(), version, codename))
}

/// Map vendor names to the short ids used by os-release
fn normalize_id(raw: &str) -> String {
    let compact: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if compact.starts_with("redhat") {
        "rhel".to_string()
    } else if compact.starts_with("centos") {
        "centos".to_string()
    } else if compact.starts_with("rocky") {
        "rocky".to_string()
    } else if compact.starts_with("almalinux") {
        "almalinux".to_string()
    } else {
        raw.split_whitespace()
            .next()
            .unwrap_or(raw)
            .to_lowercase()
    }
}

/// Runs the detection strategies
pub struct DistroDetector<'a> {
    runner: &'a Runner,
    paths: &'a SystemPaths,
}

impl<'a> DistroDetector<'a> {
    /// Create a detector
    pub fn new(runner: &'a Runner, paths: &'a SystemPaths) -> Self {
        Self { runner, paths }
    }

    /// Detect the distribution, or fail when every strategy did
    pub fn detect(&self) -> Result<Distribution> {
        tracing::info!("Try to find linux distribution via lsb_release");
        if let Some(d) = self.from_lsb_release() {
            return Ok(d);
        }

        tracing::info!("Try to find linux distribution via os-release");
        if let Some(d) = self.from_os_release() {
            return Ok(d);
        }

        tracing::info!("Try to install lsb_release & find linux distribution");
        if let Some(d) = self.install_lsb_release() {
            return Ok(d);
        }

        tracing::info!("Try to find linux distribution manually");
        if let Some(d) = self.from_legacy_release() {
            return Ok(d);
        }

        Err(DeployError::UnknownDistribution)
    }

    fn from_lsb_release(&self) -> Option<Distribution> {
        if !self.runner.has_tool("lsb_release") {
            return None;
        }
        let out = self.runner.query("lsb_release -s -i -r -c").ok()?;
        if !out.success() {
            return None;
        }
        let distro = parse_lsb_release(&out.output)?;
        if distro.id.contains("debian") {
            tracing::info!("Found debian with lsb_release but can't be trusted");
            return None;
        }
        Some(distro)
    }

    fn from_os_release(&self) -> Option<Distribution> {
        self.paths
            .os_release
            .iter()
            .find_map(|p| read(p).and_then(|c| parse_os_release(&c)))
    }

    fn install_lsb_release(&self) -> Option<Distribution> {
        let install = if self.runner.has_tool("apt-get") {
            "apt-get -y install lsb-release"
        } else if self.runner.has_tool("yum") {
            "yum -y install redhat-lsb-core"
        } else {
            return None;
        };
        // needed to continue, so this runs even in dry-run
        let out = self.runner.query(install).ok()?;
        if !out.success() {
            return None;
        }
        self.from_lsb_release()
    }

    fn from_legacy_release(&self) -> Option<Distribution> {
        self.paths
            .legacy_release
            .iter()
            .find_map(|p| read(p).and_then(|c| parse_legacy_release(&c)))
    }
}

fn read(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Guidance printed when no strategy identified the distribution
pub const UNKNOWN_DISTRIBUTION_HELP: &str = "Can't determine your linux distribution\n\
Please install lsb_release for your distribution\n\
e.g: apt install lsb-release -y || yum install redhat-lsb-core -y\n\
If the problem persists please contact the support to report this bug\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use tempfile::tempdir;

    const UBUNTU_OS_RELEASE: &str = r#"PRETTY_NAME="Ubuntu 22.04.3 LTS"
NAME="Ubuntu"
VERSION_ID="22.04"
VERSION="22.04.3 LTS (Jammy Jellyfish)"
VERSION_CODENAME=jammy
ID=ubuntu
ID_LIKE=debian
"#;

    const ROCKY_OS_RELEASE: &str = r#"NAME="Rocky Linux"
VERSION="8.8 (Green Obsidian)"
ID="rocky"
ID_LIKE="rhel centos fedora"
VERSION_ID="8.8"
"#;

    #[test]
    fn test_parse_os_release() {
        let d = parse_os_release(UBUNTU_OS_RELEASE).unwrap();
        assert_eq!(d, Distribution::new("ubuntu", "Ubuntu", "22.04", "jammy"));
        assert_eq!(d.family(), Some(DistroFamily::Ubuntu));
        assert_eq!(d.dkms_tag(), "ubuntu2204");
        assert_eq!(d.extras_tag(), "ubuntu2204");

        // codename taken from VERSION when VERSION_CODENAME is absent
        let d = parse_os_release(ROCKY_OS_RELEASE).unwrap();
        assert_eq!(d.codename, "Green Obsidian");
        assert_eq!(d.family(), Some(DistroFamily::Rhel));
        assert_eq!(d.dkms_tag(), "el88");
        assert_eq!(d.extras_tag(), "el8");
    }

    #[test]
    fn test_parse_lsb_release() {
        let d = parse_lsb_release("RedHatEnterprise\n9.2\nPlow\n").unwrap();
        assert_eq!(d.id, "rhel");
        assert_eq!(d.dkms_tag(), "el92");

        let d = parse_lsb_release("Ubuntu\n20.04\nfocal\n").unwrap();
        assert_eq!(d.id, "ubuntu");
        assert_eq!(d.major_number(), 20);
        assert!(parse_lsb_release("").is_none());
    }

    #[test]
    fn test_parse_legacy_release() {
        let d = parse_legacy_release("CentOS Linux release 7.9.2009 (Core)\n").unwrap();
        assert_eq!(d.id, "centos");
        assert_eq!(d.version, "7.9.2009");
        assert_eq!(d.codename, "Core");
        assert_eq!(d.dkms_tag(), "el79");

        let d = parse_legacy_release("Red Hat Enterprise Linux release 8.6 (Ootpa)").unwrap();
        assert_eq!(d.id, "rhel");

        let d = parse_legacy_release(
            "DISTRIB_ID=Ubuntu\nDISTRIB_RELEASE=18.04\nDISTRIB_CODENAME=bionic\n",
        )
        .unwrap();
        assert_eq!(d.dkms_tag(), "ubuntu1804");
    }

    #[test]
    fn test_debian_probe_distrusted() {
        let dir = tempdir().unwrap();
        let paths = SystemPaths::under(dir.path());
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(&paths.os_release[0], UBUNTU_OS_RELEASE).unwrap();

        let shell = ScriptedShell::new();
        shell.tool("lsb_release").on("lsb_release", 0, "Debian\n10\nbuster\n");
        let runner = Runner::new(Box::new(shell.clone()), false);

        let d = DistroDetector::new(&runner, &paths).detect().unwrap();
        assert_eq!(d.id, "ubuntu");
    }

    #[test]
    fn test_lsb_release_probe() {
        let dir = tempdir().unwrap();
        let paths = SystemPaths::under(dir.path());

        let shell = ScriptedShell::new();
        shell
            .tool("lsb_release")
            .on("lsb_release -s", 0, "Rocky\n9.2\nBlue Onyx\n");
        let runner = Runner::new(Box::new(shell.clone()), false);
        let d = DistroDetector::new(&runner, &paths).detect().unwrap();
        assert_eq!(d.id, "rocky");
    }

    #[test]
    fn test_legacy_fallback_and_failure() {
        let dir = tempdir().unwrap();
        let paths = SystemPaths::under(dir.path());
        let runner = Runner::new(Box::new(ScriptedShell::new()), false);

        let err = DistroDetector::new(&runner, &paths).detect().unwrap_err();
        assert!(matches!(err, DeployError::UnknownDistribution));

        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(&paths.legacy_release[0], "AlmaLinux release 8.7 (Stone Smilodon)").unwrap();
        let d = DistroDetector::new(&runner, &paths).detect().unwrap();
        assert_eq!(d.id, "almalinux");
        assert_eq!(d.dkms_tag(), "el87");
    }
}
