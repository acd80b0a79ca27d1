//! NVIDIA DGX detection
//!
//! DGX models have a known-good libcfs CPU partition count. The model is
//! identified from the processor version reported by DMI.

use crate::exec::Runner;
use serde::Serialize;
use std::fmt;

/// Known DGX models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DgxModel {
    /// Xeon E5-2698
    Dgx1,
    /// Xeon Platinum 8168
    Dgx2,
    /// EPYC 7742
    DgxA100,
}

impl DgxModel {
    /// Identify a model from `dmidecode -s processor-version` output
    pub fn from_processor_version(output: &str) -> Option<Self> {
        if output.contains("E5-2698") {
            Some(Self::Dgx1)
        } else if output.contains("8168") {
            Some(Self::Dgx2)
        } else if output.contains("7742") {
            Some(Self::DgxA100)
        } else {
            None
        }
    }

    /// Default `cpu_npartitions` for this model
    pub fn cpu_npartitions(&self) -> u32 {
        match self {
            Self::Dgx1 => 20,
            Self::Dgx2 => 24,
            Self::DgxA100 => 32,
        }
    }
}

impl fmt::Display for DgxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dgx1 => write!(f, "DGX-1"),
            Self::Dgx2 => write!(f, "DGX-2"),
            Self::DgxA100 => write!(f, "DGX-A100"),
        }
    }
}

/// Probe the host; `None` when not a DGX or `dmidecode` fails
pub fn detect_dgx(runner: &Runner) -> Option<DgxModel> {
    let out = runner.query("dmidecode -s processor-version").ok()?;
    if !out.success() {
        tracing::debug!("dmidecode failed with exit code {}", out.code);
        return None;
    }
    let model = DgxModel::from_processor_version(&out.output);
    if let Some(m) = model {
        tracing::info!("Detected {} system", m);
    }
    model
}
