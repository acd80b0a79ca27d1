//! exa_client_deploy CLI - EXAScaler client installation tool
//!
//! Installs, configures and removes the DDN EXAScaler client on this host.

use anyhow::Context;
use clap::Parser;
use exa_client_deploy::config::{CliArgs, DeployConfig};
use exa_client_deploy::deploy::{detect_platform, Deployer};
use exa_client_deploy::error::DeployError;
use exa_client_deploy::exec::Runner;
use exa_client_deploy::lock::PidLock;
use exa_client_deploy::prompt::Prompter;
use exa_client_deploy::system::UNKNOWN_DISTRIBUTION_HELP;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Exit status after Ctrl-C
const INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    if !nix::unistd::geteuid().is_root() {
        eprintln!("\nYou need to have root privileges to run this script. Exiting.\n");
        return ExitCode::FAILURE;
    }

    let config = match DeployConfig::from_cli(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    match run(&config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Console output follows `-v` (or `RUST_LOG`); the log file always gets info
fn init_logging(config: &DeployConfig) {
    let level = match config.verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let log_file = &config.paths.log_file;
    let file = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(f) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(f))
                .with_filter(LevelFilter::INFO),
        ),
        Err(e) => {
            eprintln!("Unable to open log file {}: {}", log_file.display(), e);
            None
        }
    };

    tracing_subscriber::registry().with(console).with(file).init();
}

/// The lock guard does not run on `process::exit`, so remove the file here
fn install_interrupt_handler(lock_file: PathBuf) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        println!("\nProcedure was interrupted by user.");
        let _ = std::fs::remove_file(&lock_file);
        std::process::exit(INTERRUPTED);
    })
    .context("Unable to install the interrupt handler")
}

fn run(config: &DeployConfig) -> anyhow::Result<ExitCode> {
    let lock = match PidLock::acquire(&config.paths.lock_file) {
        Ok(lock) => lock,
        Err(DeployError::AlreadyRunning(pid)) => {
            tracing::info!("Lock held by running process {}", pid);
            println!("Only one exa client deploy script can run at once.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("Unable to take the lock file"),
    };
    install_interrupt_handler(lock.path().to_path_buf())?;

    tracing::info!("Starting exa_client_deploy {}", exa_client_deploy::VERSION);
    if config.dry_run {
        println!("=== Dry Run Mode ===");
        println!("Host changes are printed, not executed.\n");
    }

    let runner = Runner::system(config.dry_run);
    let prompter = Prompter::terminal(config.assume_yes);

    let platform = match detect_platform(&runner, &prompter, config) {
        Ok(Some(platform)) => platform,
        Ok(None) => return Ok(ExitCode::SUCCESS),
        Err(DeployError::UnknownDistribution) => {
            print!("{}", UNKNOWN_DISTRIBUTION_HELP);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let mut deployer = Deployer::new(config, &runner, &prompter, platform);
    let result = deployer.run();
    deployer.clean();
    result?;

    Ok(ExitCode::SUCCESS)
}
