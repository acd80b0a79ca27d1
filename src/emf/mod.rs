//! EMF management API
//!
//! Used to list the mount commands of the filesystems EMF manages. The
//! endpoint comes from `--emf`, from a host named `emf`, or from the
//! operator.

pub mod client;

pub use client::{format_mount_line, ClientMount, EmfClient, Filesystem, ManagerServiceStatus};

use crate::error::Result;
use crate::exec::Runner;
use crate::prompt::Prompter;

/// Implicit endpoint name tried when `--emf` is not given
pub const DEFAULT_ENDPOINT: &str = "emf";

/// Find a responsive EMF endpoint.
///
/// An explicit `--emf` is the only candidate when given. Otherwise the
/// `emf` hostname is offered if it resolves and answers, and an
/// interactive session may type one in. `None` when nothing answered.
pub fn discover(
    runner: &Runner,
    prompter: &Prompter,
    explicit: Option<&str>,
    interactive: bool,
) -> Result<Option<String>> {
    if let Some(host) = explicit {
        if EmfClient::new(runner, host).is_responsive() {
            tracing::info!("emf api at {} seems to work, using it (from --emf)", host);
            return Ok(Some(host.to_string()));
        }
        tracing::info!("emf api is not responsive at {} (from --emf)", host);
        return Ok(None);
    }

    if runner.query(format!("getent hosts {}", DEFAULT_ENDPOINT))?.success() {
        tracing::info!("'{}' resolves, ping the API", DEFAULT_ENDPOINT);
        if EmfClient::new(runner, DEFAULT_ENDPOINT).is_responsive() {
            println!("\nemf api is responsive at '{}'", DEFAULT_ENDPOINT);
            if prompter.confirm("Do you want to use that one?", true)? {
                return Ok(Some(DEFAULT_ENDPOINT.to_string()));
            }
        }
    }

    if interactive {
        let host = prompter.input("Please specify emf endpoint (ip or hostname): ")?;
        if !host.is_empty() && EmfClient::new(runner, host.as_str()).is_responsive() {
            return Ok(Some(host));
        }
    } else {
        tracing::warn!("Please add --emf to specify the emf api endpoint");
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;

    const STATUS: &str = r#"{"data":{"managerServiceStatus":{"serviceStates":[],"running":true}}}"#;

    #[test]
    fn test_explicit_endpoint_only() {
        let shell = ScriptedShell::new();
        shell.on("10.0.0.10:7443", 7, "");
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(["emf2"], false);

        assert_eq!(discover(&runner, &prompter, Some("10.0.0.10"), true).unwrap(), None);
        assert!(!shell.called("getent"));
    }

    #[test]
    fn test_implicit_endpoint_confirmed() {
        let shell = ScriptedShell::new();
        shell
            .on("getent hosts emf", 0, "10.0.0.5 emf")
            .on("https://emf:7443", 0, STATUS);
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(Vec::<String>::new(), true);

        assert_eq!(
            discover(&runner, &prompter, None, false).unwrap().as_deref(),
            Some("emf")
        );
    }

    #[test]
    fn test_prompted_endpoint() {
        let shell = ScriptedShell::new();
        shell
            .on("getent hosts emf", 2, "")
            .on("https://10.1.1.1:7443", 0, STATUS);
        let runner = Runner::new(Box::new(shell.clone()), false);
        let prompter = Prompter::scripted(["10.1.1.1"], false);

        assert_eq!(
            discover(&runner, &prompter, None, true).unwrap().as_deref(),
            Some("10.1.1.1")
        );
        // batch mode never prompts
        let prompter = Prompter::scripted(["10.1.1.1"], false);
        assert_eq!(discover(&runner, &prompter, None, false).unwrap(), None);
    }
}
