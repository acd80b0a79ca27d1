//! Host platform detection
//!
//! Identifies the Linux distribution, the running kernel and DGX hardware.
//! The result drives every package and build decision of the procedure.

pub mod distro;
pub mod hardware;
pub mod kernel;

pub use distro::{
    DistroDetector, DistroFamily, Distribution, RHEL_DISTROS, UNKNOWN_DISTRIBUTION_HELP,
};
pub use hardware::{detect_dgx, DgxModel};

use crate::error::{DeployError, Result};
use serde::Serialize;

/// Detected distribution and kernel, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    /// Distribution
    pub distro: Distribution,
    /// Distribution family
    pub family: DistroFamily,
    /// Running kernel release
    pub kernel: String,
}

impl Platform {
    /// Combine a detected distribution with a kernel release; fails for
    /// distributions outside the supported families
    pub fn new(distro: Distribution, kernel: impl Into<String>) -> Result<Self> {
        let family = distro.family().ok_or_else(|| {
            DeployError::UnsupportedPlatform(format!(
                "{} {}: this tool is only supported on Ubuntu/RHEL-like operating systems",
                distro.name, distro.version
            ))
        })?;
        Ok(Self {
            distro,
            family,
            kernel: kernel.into(),
        })
    }

    /// Is this an Ubuntu host
    pub fn is_ubuntu(&self) -> bool {
        self.family == DistroFamily::Ubuntu
    }

    /// Is the running kernel qualified
    pub fn kernel_supported(&self) -> bool {
        kernel::is_supported(self.family, &self.kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_family() {
        let p = Platform::new(
            Distribution::new("rocky", "Rocky Linux", "8.8", ""),
            "4.18.0-477.10.1.el8_8.x86_64",
        )
        .unwrap();
        assert!(!p.is_ubuntu());
        assert!(p.kernel_supported());

        let err = Platform::new(Distribution::new("debian", "Debian", "12", "bookworm"), "6.1.0")
            .unwrap_err();
        assert!(matches!(err, DeployError::UnsupportedPlatform(_)));
    }
}
