//! External command execution
//!
//! Everything the tool does to the host goes through a [`Runner`]: package
//! managers, build tools, `ip`, `ethtool`, `sysctl`, `curl`.

mod runner;
#[cfg(test)]
mod scripted;

pub use runner::{shell_quote, CommandOutput, CommandSpec, Runner, Shell, SystemShell};
#[cfg(test)]
pub(crate) use scripted::ScriptedShell;
