//! Building the client from a source tree
//!
//! The source is a `.tar.gz` archive or an unpacked directory. It is
//! unpacked into the build directory, configured without server and test
//! components, packaged (`make debs` / `make rpms`), installed, and the
//! resulting packages are moved under the install root.

use crate::config::SystemPaths;
use crate::error::{DeployError, Result};
use crate::exec::{shell_quote, CommandSpec, Runner};
use crate::prompt::Prompter;
use crate::system::{DistroFamily, Platform};
use std::path::{Path, PathBuf};

/// Places a client source may be found when `--src-file` is not given
#[derive(Debug, Clone)]
pub struct SourceCandidates {
    /// `lustre-source.tar.gz` next to the executable
    pub local_archive: PathBuf,
    /// `lustre-source` directory next to the executable
    pub local_dir: PathBuf,
    /// Archive shipped by the installer package
    pub installed: PathBuf,
}

impl SourceCandidates {
    /// Candidates for an executable living in `script_dir`
    pub fn new(script_dir: &Path, paths: &SystemPaths) -> Self {
        Self {
            local_archive: script_dir.join("lustre-source.tar.gz"),
            local_dir: script_dir.join("lustre-source"),
            installed: paths.installed_source.clone(),
        }
    }

    fn local(&self) -> Option<PathBuf> {
        [&self.local_archive, &self.local_dir]
            .into_iter()
            .find(|p| p.exists())
            .cloned()
    }

    /// Pick a source.
    ///
    /// Exactly one of local/installed present: use it. Both: ask, local by
    /// default. Neither: ask for a path when interactive. Still nothing is
    /// fatal.
    pub fn resolve(&self, prompter: &Prompter, interactive: bool) -> Result<PathBuf> {
        let local = self.local();
        let installed = self.installed.exists().then(|| self.installed.clone());

        let mut chosen = match (local, installed) {
            (Some(l), None) => Some(l),
            (None, Some(i)) => Some(i),
            (Some(l), Some(i)) => {
                if prompter.confirm(
                    "\nBoth local and installed archives found\nDo you want to install the local one",
                    true,
                )? {
                    Some(l)
                } else {
                    Some(i)
                }
            }
            (None, None) => None,
        };

        if chosen.is_none() && interactive {
            let answer = prompter.input("Enter path to lustre source (leave empty to use default source): ")?;
            if !answer.is_empty() {
                chosen = Some(PathBuf::from(answer));
            }
        }

        match chosen {
            Some(path) if path.exists() => {
                println!("\nSelected {} for installation\n", path.display());
                Ok(path)
            }
            _ => Err(DeployError::validation("Can't find client archive. Exiting.")),
        }
    }
}

/// Is `path` a compressed tarball (as opposed to a source directory)
pub fn is_archive(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(".tar.gz"))
        .unwrap_or(false)
}

/// Value of `--with-o2ib`, or `None` to let configure decide
pub fn o2ib_flag(family: DistroFamily, mofed_path: Option<&Path>, disable_o2ib: bool) -> Option<String> {
    if disable_o2ib {
        return Some("--with-o2ib=no".to_string());
    }
    mofed_path.map(|p| match family {
        DistroFamily::Ubuntu => format!("--with-o2ib={}", p.display()),
        DistroFamily::Rhel => "--with-o2ib=yes".to_string(),
    })
}

/// MOFED kernel sources matching `kernel`
pub fn mofed_source_path(ofa_kernel: &Path, kernel: &str) -> PathBuf {
    [ofa_kernel.join("x86_64").join(kernel), ofa_kernel.join(kernel)]
        .into_iter()
        .find(|p| p.exists())
        .unwrap_or_else(|| ofa_kernel.join("default"))
}

/// One client build
pub struct LustreBuild<'a> {
    runner: &'a Runner,
    platform: &'a Platform,
    paths: &'a SystemPaths,
    builddir: PathBuf,
    mofed_installed: bool,
    disable_o2ib: bool,
}

impl<'a> LustreBuild<'a> {
    /// Create a build in `builddir`
    pub fn new(
        runner: &'a Runner,
        platform: &'a Platform,
        paths: &'a SystemPaths,
        builddir: PathBuf,
        mofed_installed: bool,
        disable_o2ib: bool,
    ) -> Self {
        Self {
            runner,
            platform,
            paths,
            builddir,
            mofed_installed,
            disable_o2ib,
        }
    }

    /// Where the built packages end up
    pub fn output_dir(&self) -> PathBuf {
        self.paths.install_root.join(self.platform.family.package_dir())
    }

    /// Unpack or copy `source` into the build directory; returns the tree
    pub fn unpack(&self, source: &Path) -> Result<PathBuf> {
        if is_archive(source) {
            self.runner.apply_checked(
                format!(
                    "tar xpf {} -C {}",
                    shell_quote(&source.to_string_lossy()),
                    shell_quote(&self.builddir.to_string_lossy())
                ),
                "Unable to unpack lustre source file",
            )?;
            if self.runner.is_dry_run() {
                return Ok(self.builddir.clone());
            }
            let entries = std::fs::read_dir(&self.builddir)
                .map_err(|e| DeployError::io(&self.builddir, e))?;
            let tree = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .find(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().contains("lustre"))
                        .unwrap_or(false)
                });
            // the archive may unpack straight into the build directory
            Ok(tree.unwrap_or_else(|| self.builddir.clone()))
        } else {
            let name = source.file_name().ok_or_else(|| {
                DeployError::validation(format!("{} is not a source directory", source.display()))
            })?;
            let tree = self.builddir.join(name);
            self.runner.apply_checked(
                format!(
                    "cp -a {} {}",
                    shell_quote(&source.to_string_lossy()),
                    shell_quote(&tree.to_string_lossy())
                ),
                "Unable to copy lustre source directory",
            )?;
            Ok(tree)
        }
    }

    /// Build commands, run inside the source tree
    pub fn commands(&self, nproc: u32) -> Vec<String> {
        let family = self.platform.family;
        let kernel = &self.platform.kernel;
        let mofed = self
            .mofed_installed
            .then(|| mofed_source_path(&self.paths.ofa_kernel, kernel));
        let o2ib = o2ib_flag(family, mofed.as_deref(), self.disable_o2ib);
        let output = self.output_dir();
        let output = output.display();

        let mut configure = vec!["./configure".to_string()];
        if family == DistroFamily::Ubuntu {
            configure.push(format!("--with-linux=/usr/src/linux-headers-{}", kernel));
        }
        configure.push("--disable-server".to_string());
        configure.push("--disable-tests".to_string());
        configure.extend(o2ib);

        let mut cmds = Vec::new();
        match family {
            DistroFamily::Ubuntu => {
                cmds.push("sh autogen.sh".to_string());
                cmds.push(configure.join(" "));
                cmds.push(format!("make debs -j {}", nproc));
                // --disable-tests has no effect on debs
                cmds.push("rm -f debs/lustre-tests*.deb".to_string());
                cmds.push("rm -f debs/lustre-iokit*.deb".to_string());
                cmds.push("rm -f debs/lustre-source*.deb".to_string());
                cmds.push("apt -y install ./debs/lustre*.deb".to_string());
                cmds.push(format!("mkdir -p {}", output));
                cmds.push(format!("mv debs/lustre*.deb {}", output));
            }
            DistroFamily::Rhel => {
                if self.platform.distro.major() == "7" {
                    cmds.push("autoreconf --force --install".to_string());
                }
                cmds.push("sh autogen.sh".to_string());
                cmds.push(configure.join(" "));
                cmds.push(format!("make rpms -j {}", nproc));
                cmds.push("rm -f *lustre-client-debug*.rpm".to_string());
                cmds.push("yum install -y kmod-lustre-client-*.rpm lustre-client*.rpm".to_string());
                cmds.push(format!("mkdir -p {}", output));
                cmds.push(format!("mv kmod-lustre-client-*.rpm lustre-client*.rpm {}", output));
            }
        }
        cmds
    }

    /// Number of processing units for `make -j`
    pub fn nproc(&self) -> u32 {
        match self.runner.query("nproc") {
            Ok(out) if out.success() => out.output.trim().parse().unwrap_or(1),
            _ => {
                tracing::warn!("Unable to get processor details");
                1
            }
        }
    }

    /// Unpack, build and install from `source`
    pub fn run(&self, source: &Path) -> Result<()> {
        let tree = self.unpack(source)?;
        println!("\nBuilding EXAScaler client software. This may take a while...");

        for cmd in self.commands(self.nproc()) {
            let context = format!("Lustre build command failed: {}", cmd);
            self.runner
                .apply_checked(CommandSpec::new(cmd).in_dir(&tree), &context)?;
        }

        println!(
            "EXAScaler client software packages are installed and placed in {} folder",
            self.output_dir().display()
        );
        Ok(())
    }
}
