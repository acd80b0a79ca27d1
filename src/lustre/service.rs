//! Lustre client runtime: stop, mounts, LNet configuration backup

use crate::error::{DeployError, Result};
use crate::exec::Runner;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static FINDMNT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"TARGET="(.+)""#).expect("Invalid findmnt regex"));
static VERMAGIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^vermagic:\s*(\S+)").expect("Invalid modinfo regex"));

/// Unload the client modules.
///
/// `lustre_rmmod` alone usually works; otherwise LNet is stopped through
/// its service or `lctl` first. Returns whether the modules are unloaded.
pub fn stop(runner: &Runner) -> Result<bool> {
    println!("Stopping lustre on node.");

    if runner.apply("lustre_rmmod")?.success() {
        return Ok(true);
    }
    if !runner.apply("service lnet stop")?.success()
        && !runner.apply("lctl network down")?.success()
    {
        tracing::info!("Can not stop lnet");
    }
    let stopped = runner.apply("lustre_rmmod")?.success();
    if !stopped {
        tracing::warn!("Can not stop lustre.");
    }
    Ok(stopped)
}

/// Mount points of lustre filesystems
pub fn mounts(runner: &Runner) -> Result<Vec<String>> {
    let out = runner.query("findmnt -t lustre -P -o TARGET")?;
    if !out.success() {
        return Ok(Vec::new());
    }
    Ok(FINDMNT_REGEX
        .captures_iter(&out.output)
        .map(|c| c[1].to_string())
        .collect())
}

/// Lazily unmount every mount point
pub fn unmount_all(runner: &Runner, mounts: &[String]) -> Result<()> {
    for target in mounts {
        runner.apply_checked(
            format!("umount -lf {}", target),
            &format!("Failed to unmount lustre from {}", target),
        )?;
    }
    Ok(())
}

/// Bring LNet up from the module configuration, save the resulting
/// configuration to `lnet_conf` and unload the modules again
pub fn configure_lnet_conf(runner: &Runner, lnet_conf: &Path) -> Result<()> {
    runner.apply_checked("modprobe lnet", "Unable to load the lnet module")?;
    runner.apply_checked("lnetctl lnet configure --all", "Unable to configure LNet")?;

    let export = runner.apply("lnetctl export --backup")?;
    if export.success() && !runner.is_dry_run() {
        runner.write_file(lnet_conf, &export.output)?;
    } else if !export.success() {
        tracing::warn!("lnetctl export failed, {} not updated", lnet_conf.display());
    }

    if !runner.apply("lnetctl lnet unconfigure")?.success() {
        tracing::warn!("lnetctl lnet unconfigure failed");
    }
    if !runner.apply("lustre_rmmod")?.success() {
        tracing::warn!("lustre_rmmod failed after LNet configuration");
    }
    Ok(())
}

/// `vermagic` release of the installed lustre module
pub fn module_vermagic(modinfo: &str) -> Option<String> {
    VERMAGIC_REGEX.captures(modinfo).map(|c| c[1].to_string())
}

/// Was the installed lustre module built for `kernel`; `None` when
/// `modinfo` can't tell
pub fn module_matches_kernel(runner: &Runner, kernel: &str) -> Option<bool> {
    let out = runner.query("modinfo lustre").ok()?;
    if !out.success() {
        tracing::info!("Can't compare modinfo/uname");
        return None;
    }
    module_vermagic(&out.output).map(|v| v == kernel)
}

/// Fail when lustre is mounted
pub fn ensure_not_mounted(runner: &Runner) -> Result<()> {
    let mounted = mounts(runner)?;
    if mounted.is_empty() {
        Ok(())
    } else {
        Err(DeployError::validation(format!(
            "Found mounted lustre file system(s): {}. Please unmount them first",
            mounted.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;
    use tempfile::tempdir;

    #[test]
    fn test_stop_fallback_chain() {
        let shell = ScriptedShell::new();
        shell.on("lustre_rmmod", 1, "").on("service lnet stop", 1, "");
        let runner = Runner::new(Box::new(shell.clone()), false);

        assert!(!stop(&runner).unwrap());
        assert_eq!(
            shell.calls(),
            vec!["lustre_rmmod", "service lnet stop", "lctl network down", "lustre_rmmod"]
        );

        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert!(stop(&runner).unwrap());
        assert_eq!(shell.calls(), vec!["lustre_rmmod"]);
    }

    #[test]
    fn test_mounts() {
        let shell = ScriptedShell::new();
        shell.on(
            "findmnt",
            0,
            "TARGET=\"/lustre/fs1\"\nTARGET=\"/mnt/scratch dir\"\n",
        );
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert_eq!(mounts(&runner).unwrap(), vec!["/lustre/fs1", "/mnt/scratch dir"]);
        assert!(ensure_not_mounted(&runner).is_err());

        let runner = Runner::new(Box::new(ScriptedShell::with_default(1)), false);
        assert!(mounts(&runner).unwrap().is_empty());
        assert!(ensure_not_mounted(&runner).is_ok());
    }

    #[test]
    fn test_unmount_failure_is_fatal() {
        let shell = ScriptedShell::new();
        shell.on("umount -lf /lustre/fs2", 32, "umount: target is busy");
        let runner = Runner::new(Box::new(shell.clone()), false);

        let mounts = vec!["/lustre/fs1".to_string(), "/lustre/fs2".to_string()];
        let err = unmount_all(&runner, &mounts).unwrap_err();
        assert!(err.to_string().contains("/lustre/fs2"));
    }

    #[test]
    fn test_configure_lnet_conf_saves_export() {
        let dir = tempdir().unwrap();
        let conf = dir.path().join("lnet.conf");
        let shell = ScriptedShell::new();
        shell.on("lnetctl export", 0, "net:\n    - net type: o2ib\n");
        let runner = Runner::new(Box::new(shell.clone()), false);

        configure_lnet_conf(&runner, &conf).unwrap();
        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "net:\n    - net type: o2ib\n");
        assert_eq!(shell.calls().last().unwrap(), "lustre_rmmod");

        let shell = ScriptedShell::new();
        shell.on("lnetctl lnet configure", 1, "");
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert!(configure_lnet_conf(&runner, &conf).is_err());
        assert!(!shell.called("lnetctl export"));
    }

    #[test]
    fn test_dry_run_keeps_lnet_conf() {
        let dir = tempdir().unwrap();
        let conf = dir.path().join("lnet.conf");
        let shell = ScriptedShell::new();
        let runner = Runner::new(Box::new(shell.clone()), true);

        configure_lnet_conf(&runner, &conf).unwrap();
        assert!(!conf.exists());
        assert!(shell.calls().is_empty());
        assert_eq!(runner.planned()[0], "$ modprobe lnet");
    }

    #[test]
    fn test_vermagic() {
        let modinfo = "filename:       /lib/modules/4.18.0-477.10.1.el8_8.x86_64/extra/lustre.ko\n\
                       license:        GPL\n\
                       vermagic:       4.18.0-477.10.1.el8_8.x86_64 SMP mod_unload modversions\n";
        assert_eq!(module_vermagic(modinfo).as_deref(), Some("4.18.0-477.10.1.el8_8.x86_64"));

        let shell = ScriptedShell::new();
        shell.on("modinfo lustre", 0, modinfo);
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert_eq!(module_matches_kernel(&runner, "4.18.0-477.10.1.el8_8.x86_64"), Some(true));
        assert_eq!(module_matches_kernel(&runner, "4.18.0-513.5.1.el8_9.x86_64"), Some(false));
    }
}
