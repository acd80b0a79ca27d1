//! Package queries, build orchestration and client installation
//!
//! [`PackageManager`] wraps the host package database (`rpm`/`dpkg`). The
//! submodules prepare the build environment, build the client from source
//! or install prebuilt DKMS packages, and add the bundled extras.

pub mod build_env;
pub mod dkms;
pub mod extras;
pub mod lists;
pub mod source;

pub use build_env::prepare_build_env;
pub use source::{LustreBuild, SourceCandidates};

use crate::exec::{shell_quote, Runner};
use crate::system::DistroFamily;
use regex::Regex;
use std::sync::LazyLock;

static DPKG_LIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\w+)\s+((?:lustre|lipe)[\w.\-]+)").expect("Invalid dpkg list regex")
});

/// Package states counted as installed: installed, reinstall-required,
/// unpacked-pending-configuration
const INSTALLED_STATES: &[&str] = &["ii", "ri", "iU"];

/// Client packages listed by `dpkg -l` in an installed state
pub fn parse_dpkg_list(output: &str) -> Vec<String> {
    DPKG_LIST_REGEX
        .captures_iter(output)
        .filter(|c| INSTALLED_STATES.contains(&&c[1]))
        .map(|c| c[2].to_string())
        .collect()
}

/// Host package database for one distribution family
pub struct PackageManager<'a> {
    runner: &'a Runner,
    family: DistroFamily,
}

impl<'a> PackageManager<'a> {
    /// Create a package manager for `family`
    pub fn new(runner: &'a Runner, family: DistroFamily) -> Self {
        Self { runner, family }
    }

    /// Is package `name` installed
    pub fn is_installed(&self, name: &str) -> bool {
        let cmd = match self.family {
            DistroFamily::Rhel => format!("rpm -q {} >/dev/null 2>&1", shell_quote(name)),
            DistroFamily::Ubuntu => format!("dpkg-query -s {} >/dev/null 2>&1", shell_quote(name)),
        };
        self.runner.query(cmd).map(|o| o.success()).unwrap_or(false)
    }

    /// Installed Lustre client and lipe packages
    pub fn installed_client_packages(&self) -> Vec<String> {
        match self.family {
            DistroFamily::Ubuntu => ["'lustre*'", "'lipe*'"]
                .iter()
                .filter_map(|pattern| self.runner.query(format!("dpkg -l {}", pattern)).ok())
                .filter(|o| o.success())
                .flat_map(|o| parse_dpkg_list(&o.output))
                .collect(),
            DistroFamily::Rhel => self
                .runner
                .query("rpm -qa 'lustre*' 'kmod-lustre*' 'lipe*'")
                .ok()
                .filter(|o| o.success())
                .map(|o| {
                    o.output
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Installed version of a Debian package
    pub fn installed_version(&self, name: &str) -> Option<String> {
        let out = self
            .runner
            .query(format!("dpkg-query --showformat='${{Version}}' --show {}", shell_quote(name)))
            .ok()?;
        let version = out.output.trim();
        (out.success() && !version.is_empty()).then(|| version.to_string())
    }

    /// Snapshot of the Debian package database (`dpkg -l`)
    pub fn snapshot(&self) -> Vec<String> {
        match self.runner.query("dpkg -l") {
            Ok(out) if out.success() => out.output.lines().map(str::to_string).collect(),
            _ => {
                tracing::warn!("Unable to get debs' list.");
                Vec::new()
            }
        }
    }

    /// Are the MOFED kernel packages installed
    pub fn mofed_installed(&self) -> bool {
        match self.family {
            DistroFamily::Rhel => lists::MOFED_RHEL.iter().all(|p| self.is_installed(p)),
            DistroFamily::Ubuntu => lists::MOFED_UBUNTU.iter().any(|p| self.is_installed(p)),
        }
    }

    /// Remove the installed subset of `packages` (plus `lustre-source` on
    /// Ubuntu). Failure is logged; returns whether everything went away.
    pub fn remove(&self, packages: &[String]) -> bool {
        tracing::info!("Removing temporary packages");

        let mut candidates: Vec<&str> = Vec::new();
        if self.family == DistroFamily::Ubuntu {
            candidates.push("lustre-source");
        }
        candidates.extend(packages.iter().map(String::as_str));

        let mut to_remove: Vec<&str> = Vec::new();
        for pkg in candidates {
            if !to_remove.contains(&pkg) && self.is_installed(pkg) {
                to_remove.push(pkg);
            }
        }
        tracing::info!("Packages to remove: {}.", to_remove.join(","));
        if to_remove.is_empty() {
            return true;
        }

        let cmd = match self.family {
            DistroFamily::Ubuntu => format!("dpkg --remove {}", to_remove.join(" ")),
            DistroFamily::Rhel => format!("yum remove -y {}", to_remove.join(" ")),
        };
        match self.runner.apply(cmd) {
            Ok(out) if out.success() => {
                tracing::info!("Temporary packages were removed.");
                true
            }
            Ok(out) => {
                tracing::warn!("Package removal exited with code {}", out.code);
                false
            }
            Err(e) => {
                tracing::warn!("Package removal failed: {}", e);
                false
            }
        }
    }
}
