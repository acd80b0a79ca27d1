//! Error types for exa-client-deploy
//!
//! Every fatal condition of the deploy procedure is a [`DeployError`]
//! propagated with `?` up to `main`, which prints it and exits with status 1.
//! Advisory failures (tunings, persistence, optional packages) never become
//! a `DeployError`: they are logged with `tracing::warn!` and reported as a
//! boolean by the step that swallowed them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for deploy operations
#[derive(Error, Debug)]
pub enum DeployError {
    /// I/O error on a host file
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command required by the procedure exited non-zero
    #[error("Command '{command}' failed with exit code {code}")]
    CommandFailed { command: String, code: i32 },

    /// A command could not be started at all
    #[error("Unable to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A precondition of the requested action does not hold
    #[error("{0}")]
    Validation(String),

    /// Host is not a supported distribution
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Linux distribution could not be determined by any strategy
    #[error("Can't determine the linux distribution")]
    UnknownDistribution,

    /// Malformed LNet specification
    #[error("Please specify LNets in the correct format e.g. o2ib0(ib0,ib1), got '{0}'")]
    InvalidLnet(String),

    /// Output of a host tool could not be understood
    #[error("Unable to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Another instance holds the lock file
    #[error("Only one exa client deploy script can run at once (pid {0})")]
    AlreadyRunning(i32),

    /// Management API error
    #[error("EMF API error: {0}")]
    Emf(String),

    /// Operator declined a prompt guarding a required step
    #[error("Aborted by operator: {0}")]
    Aborted(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a parse error
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a command failure error
    pub fn command(command: impl Into<String>, code: i32) -> Self {
        Self::CommandFailed {
            command: command.into(),
            code,
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if the error comes from a host command (as opposed to a
    /// precondition or a local file problem)
    pub fn is_command_error(&self) -> bool {
        match self {
            Self::CommandFailed { .. } | Self::Spawn { .. } => true,
            Self::WithContext { source, .. } => source.is_command_error(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for deploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::Emf(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DeployError::io(path, e))
    }
}
