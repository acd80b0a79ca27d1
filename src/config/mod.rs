//! Configuration module for exa-client-deploy
//!
//! Provides CLI arguments, the resolved deploy configuration and the host
//! file locations.

mod settings;

pub use settings::*;
