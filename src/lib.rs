//! # exa_client_deploy - EXAScaler client installer
//!
//! Installs, configures and removes the DDN EXAScaler (Lustre) client on
//! Ubuntu and RHEL-family hosts. The same binary drives an interactive menu
//! or runs the actions given on the command line, and is re-run at boot by
//! a systemd unit to re-apply the network configuration.
//!
//! ## Features
//!
//! - **Platform detection**: distribution, running kernel, DGX hardware
//! - **Client build**: build environment, source build or prebuilt DKMS packages
//! - **LNet configuration**: module parameters, multi-rail routing, ARP sysctls
//! - **NIC tuning**: ring buffers, channels, LRO, Mellanox relaxed ordering
//! - **Persistence**: boot-time systemd unit
//! - **EMF integration**: mount commands from the management API
//! - **Dry-run**: every host change printed instead of executed
//!
//! ## Quick Start
//!
//! ```no_run
//! use exa_client_deploy::config::{CliArgs, DeployConfig};
//! use exa_client_deploy::deploy::{detect_platform, Deployer};
//! use exa_client_deploy::exec::Runner;
//! use exa_client_deploy::prompt::Prompter;
//! use clap::Parser;
//!
//! let args = CliArgs::parse_from(["exa_client_deploy", "--configure", "-l", "o2ib0(ib0)", "-d"]);
//! let config = DeployConfig::from_cli(&args).unwrap();
//! let runner = Runner::system(config.dry_run);
//! let prompter = Prompter::terminal(config.assume_yes);
//!
//! if let Some(platform) = detect_platform(&runner, &prompter, &config).unwrap() {
//!     let mut deployer = Deployer::new(&config, &runner, &prompter, platform);
//!     deployer.run().unwrap();
//!     deployer.clean();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod deploy;
pub mod emf;
pub mod error;
pub mod exec;
pub mod lock;
pub mod lustre;
pub mod network;
pub mod packages;
pub mod persist;
pub mod prompt;
pub mod system;

// Re-export commonly used types
pub use config::{CliArgs, DeployConfig, SystemPaths};
pub use deploy::{Action, Deployer};
pub use error::{DeployError, Result};
pub use exec::Runner;
pub use prompt::Prompter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use exa_client_deploy::prelude::*;
    //! ```

    pub use crate::config::{CliArgs, DeployConfig, SystemPaths};
    pub use crate::deploy::{detect_platform, Action, Deployer, Flow};
    pub use crate::emf::EmfClient;
    pub use crate::error::{DeployError, Result};
    pub use crate::exec::{CommandSpec, Runner};
    pub use crate::lustre::ModprobeConf;
    pub use crate::network::{LnetSpec, Transport};
    pub use crate::prompt::Prompter;
    pub use crate::system::{DistroFamily, Distribution, Platform};
}
