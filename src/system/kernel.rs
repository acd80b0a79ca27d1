//! Running kernel release and support checks

use super::distro::DistroFamily;
use crate::error::{DeployError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Kernel base versions the client is qualified on (RHEL family)
pub const SUPPORTED_KERNELS_RHEL: &[&str] = &["3.10.0", "4.18.0", "5.14.0"];

/// Kernel base versions the client is qualified on (Ubuntu)
pub const SUPPORTED_KERNELS_UBUNTU: &[&str] = &["4.15.0", "5.3.0", "5.4.0", "5.15.0"];

// X.Y.Z-V.W (4.18.0-240.22), else X.Y.Z-V (3.10.0-1127)
static KERNEL_LONG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+-[0-9]+\.[0-9]+").expect("Invalid kernel regex"));
static KERNEL_SHORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+-[0-9]+").expect("Invalid kernel regex"));

/// Release of the running kernel (`uname -r`)
pub fn running_kernel() -> Result<String> {
    let uts = nix::sys::utsname::uname()
        .map_err(|e| DeployError::parse("uname", e.to_string()))?;
    Ok(uts.release().to_string_lossy().into_owned())
}

/// Base version of a release (`4.18.0` of `4.18.0-477.10.1.el8_8.x86_64`)
pub fn base_version(release: &str) -> &str {
    release.split('-').next().unwrap_or(release)
}

/// Is the kernel release qualified for `family`
pub fn is_supported(family: DistroFamily, release: &str) -> bool {
    let supported = match family {
        DistroFamily::Rhel => SUPPORTED_KERNELS_RHEL,
        DistroFamily::Ubuntu => SUPPORTED_KERNELS_UBUNTU,
    };
    supported.contains(&base_version(release))
}

/// Kernel version usable for header matching, plus the pattern that found it
fn extract(release: &str) -> Option<(&'static Regex, String)> {
    for re in [&*KERNEL_LONG_REGEX, &*KERNEL_SHORT_REGEX] {
        if let Some(m) = re.find(release) {
            return Some((re, m.as_str().to_string()));
        }
    }
    None
}

/// Kernel version usable for header matching (`4.18.0-240.22`, `3.10.0-1127`)
pub fn extract_kernel_version(release: &str) -> Option<String> {
    extract(release).map(|(_, v)| v)
}

/// Does any of `available` header versions match the running kernel
pub fn headers_match(release: &str, available: &[String]) -> Result<bool> {
    let (re, running) = extract(release).ok_or_else(|| {
        DeployError::parse("kernel release", format!("Can't extract kernel version from {}", release))
    })?;

    Ok(available
        .iter()
        .filter_map(|h| re.find(h))
        .any(|m| m.as_str() == running))
}

/// Versions listed after `Available Packages` in `yum list` output
pub fn parse_yum_available(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| l.trim() != "Available Packages")
        .skip(1)
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}
