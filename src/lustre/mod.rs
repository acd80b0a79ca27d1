//! Lustre client module configuration and runtime control

pub mod modprobe;
pub mod service;

pub use modprobe::ModprobeConf;
pub use service::{configure_lnet_conf, ensure_not_mounted, mounts, stop, unmount_all};
