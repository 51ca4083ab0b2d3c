//! Cadence - config-driven personal automation engine
//!
//! CLI entry point: loads the configuration, builds the module manager,
//! and drives the run loop (period timers + filesystem watcher) until
//! interrupted.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cadence::manager::ModuleManager;
use cadence::watcher::DirectoryWatcher;

/// Config-driven personal automation engine
///
/// Binds user-defined modules to timers (static, weekday, solar) and runs
/// their lifecycle action blocks: context imports, template compilation,
/// and shell commands.
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "cadence.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine until interrupted
    Run {
        /// Finish pending work once, run exit blocks, and return
        #[arg(long)]
        oneshot: bool,
    },
    /// Validate the configuration and describe the resulting modules
    Check,
}

fn lock(manager: &Arc<Mutex<ModuleManager>>) -> MutexGuard<'_, ModuleManager> {
    manager.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Check => check(&cli.config),
        Command::Run { oneshot } => run(&cli.config, oneshot).await,
    }
}

/// Load the configuration and print a human-readable module summary.
fn check(config_path: &Path) -> Result<()> {
    let manager = load_manager(config_path)?;
    print!("{}", describe(&manager));
    Ok(())
}

fn load_manager(config_path: &Path) -> Result<ModuleManager> {
    ModuleManager::from_path(config_path)
        .with_context(|| format!("failed to load config from '{}'", config_path.display()))
}

/// One line per module with its timer and templates.
fn describe(manager: &ModuleManager) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} module(s) configured", manager.len());
    for module in manager.modules() {
        let timer = module.timer();
        let _ = writeln!(
            out,
            "  module/{}: {} timer, current period \"{}\"",
            module.name(),
            timer.kind(),
            timer.period()
        );
        for (name, template) in module.templates() {
            let _ = writeln!(
                out,
                "    template {}: \"{}\" -> \"{}\"",
                name,
                template.source.display(),
                template.target.display()
            );
        }
    }
    out
}

/// The run loop: finish pending work whenever the nearest period boundary
/// passes, dispatch watcher events as they arrive, and run exit blocks
/// exactly once on shutdown.
async fn run(config_path: &Path, oneshot: bool) -> Result<()> {
    let manager = load_manager(config_path)?;
    let directory = manager.directory().to_path_buf();
    let manager = Arc::new(Mutex::new(manager));

    lock(&manager).finish_tasks();
    if oneshot {
        lock(&manager).exit();
        return Ok(());
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = DirectoryWatcher::new(directory, move |path| {
        let _ = tx.send(path);
    });
    watcher
        .start()
        .context("failed to start filesystem watcher")?;

    loop {
        let wait = lock(&manager).time_until_next_period();
        tracing::debug!(
            "waiting up to {:.0}s for the next period",
            wait.as_secs_f64()
        );
        tokio::select! {
            () = tokio::time::sleep(wait) => lock(&manager).finish_tasks(),
            Some(path) = rx.recv() => lock(&manager).on_modified(&path),
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                break;
            }
        }
    }

    watcher.stop();
    lock(&manager).exit();
    Ok(())
}
