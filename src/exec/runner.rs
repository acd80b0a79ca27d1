//! Shell command execution with dry-run support
//!
//! Commands run through `sh -c` with stderr folded into stdout. Output is
//! read line by line: each line goes to the log and into the returned
//! buffer. A non-zero exit status is a normal [`CommandOutput`]; only a
//! command that cannot be started is an error. Callers decide escalation.

use crate::error::{DeployError, IoResultExt, Result};
use std::cell::RefCell;
use std::io::{BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

/// A command line with its working directory and extra environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line
    pub line: String,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for a shell command line
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Run from `dir`
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl From<&str> for CommandSpec {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

impl From<String> for CommandSpec {
    fn from(line: String) -> Self {
        Self::new(line)
    }
}

/// Exit code and combined stdout/stderr of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (128 + signal when killed by a signal)
    pub code: i32,
    /// Combined output
    pub output: String,
}

impl CommandOutput {
    /// Create an output record
    pub fn new(code: i32, output: impl Into<String>) -> Self {
        Self {
            code,
            output: output.into(),
        }
    }

    /// Did the command exit with status 0
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Something that can run command lines and locate tools
pub trait Shell {
    /// Run a command to completion
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Is `name` available on `PATH`
    fn has_tool(&self, name: &str) -> bool;
}

impl<S: Shell + ?Sized> Shell for Rc<S> {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        (**self).execute(spec)
    }

    fn has_tool(&self, name: &str) -> bool {
        (**self).has_tool(name)
    }
}

/// The host shell
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{}", spec.line))
            .stdout(Stdio::piped());

        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let spawn_err = |source| DeployError::Spawn {
            command: spec.line.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let mut output = String::new();

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let n = reader.read_until(b'\n', &mut buf).map_err(spawn_err)?;
                if n == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    tracing::info!("{}", trimmed);
                }
                output.push_str(&line);
            }
        }

        let status = child.wait().map_err(spawn_err)?;
        let code = status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));

        Ok(CommandOutput { code, output })
    }

    fn has_tool(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Runs commands for the deploy procedure.
///
/// [`Runner::query`] always executes: it is meant for read-only probes
/// (`rpm -q`, `ethtool -g`, `lshw`, ...). [`Runner::apply`] and the file
/// helpers change the host and only print what they would do in dry-run.
pub struct Runner {
    shell: Box<dyn Shell>,
    dry_run: bool,
    planned: RefCell<Vec<String>>,
}

impl Runner {
    /// Create a runner over `shell`
    pub fn new(shell: Box<dyn Shell>, dry_run: bool) -> Self {
        Self {
            shell,
            dry_run,
            planned: RefCell::new(Vec::new()),
        }
    }

    /// Create a runner over the host shell
    pub fn system(dry_run: bool) -> Self {
        Self::new(Box::new(SystemShell), dry_run)
    }

    /// Is this a dry run
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only command, even in dry-run
    pub fn query(&self, spec: impl Into<CommandSpec>) -> Result<CommandOutput> {
        let spec = spec.into();
        match spec.cwd {
            Some(ref dir) => tracing::info!("Running '{}' command in {}", spec.line, dir.display()),
            None => tracing::info!("Running '{}' command", spec.line),
        }
        self.shell.execute(&spec)
    }

    /// Run a command that changes the host
    pub fn apply(&self, spec: impl Into<CommandSpec>) -> Result<CommandOutput> {
        let spec = spec.into();
        if self.dry_run {
            self.plan(format!("$ {}", spec.line));
            return Ok(CommandOutput::default());
        }
        self.query(spec)
    }

    /// Run a command that changes the host and fail on a non-zero exit
    pub fn apply_checked(
        &self,
        spec: impl Into<CommandSpec>,
        context: &str,
    ) -> Result<CommandOutput> {
        let spec = spec.into();
        let line = spec.line.clone();
        let out = self.apply(spec)?;
        if !out.success() {
            return Err(DeployError::command(line, out.code).with_context(context));
        }
        Ok(out)
    }

    /// Is `name` available on the host
    pub fn has_tool(&self, name: &str) -> bool {
        self.shell.has_tool(name)
    }

    /// Replace the content of `path`
    pub fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if self.dry_run {
            let mut redirect = ">";
            for line in content.lines() {
                self.plan(format!("$ echo '{}' {} {}", line, redirect, path.display()));
                redirect = ">>";
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        tracing::info!("Writing {}", path.display());
        std::fs::write(path, content).with_path(path)
    }

    /// Append `content` to `path`
    pub fn append_file(&self, path: &Path, content: &str) -> Result<()> {
        if self.dry_run {
            for line in content.lines().filter(|l| !l.is_empty()) {
                self.plan(format!("$ echo '{}' >> {}", line, path.display()));
            }
            return Ok(());
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_path(path)?;
        file.write_all(content.as_bytes()).with_path(path)
    }

    /// Create a directory and its parents
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.plan(format!("$ mkdir -p {}", path.display()));
            return Ok(());
        }
        std::fs::create_dir_all(path).with_path(path)
    }

    /// Remove a directory tree if present
    pub fn remove_dir_all(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.plan(format!("$ rm -rf {}", path.display()));
            return Ok(());
        }
        if path.exists() {
            std::fs::remove_dir_all(path).with_path(path)?;
        }
        Ok(())
    }

    /// Copy a file
    pub fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.dry_run {
            self.plan(format!("$ cp {} {}", from.display(), to.display()));
            return Ok(());
        }
        std::fs::copy(from, to).with_path(to)?;
        Ok(())
    }

    /// Lines printed instead of executed so far (dry-run only)
    pub fn planned(&self) -> Vec<String> {
        self.planned.borrow().clone()
    }

    fn plan(&self, line: String) {
        println!("{}", line);
        self.planned.borrow_mut().push(line);
    }
}

/// Quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
