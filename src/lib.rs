// src/lib.rs

pub mod channel;
pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod group;
pub mod logging;
pub mod process;
pub mod registry;
pub mod signal;
pub mod task;
pub mod types;
pub mod value;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, default_config_path, load_and_validate};
use crate::engine::{JoinMode, Orchestrator, OrchestratorOptions};
use crate::task::{CallbackTask, Task};

pub use crate::engine::PoolOptions;
pub use crate::errors::ForkpoolError;
pub use crate::task::{BatchOutput, BatchTask, TaskContext};
pub use crate::value::Value;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - one shell task per command
/// - the orchestrator (pool threshold, join/detach)
///
/// Returns the process exit code: 0 when every joined command succeeded.
pub fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_config(&args)?;
    let mode = resolve_mode(&args, &cfg);
    let pool = args
        .pool
        .map(|n| n as usize)
        .or(cfg.pool.map(|p| p.size));

    if args.dry_run {
        print_dry_run(&args, &cfg, mode, pool);
        return Ok(0);
    }

    let cwd = std::env::current_dir().context("reading current directory")?;
    let mut options = OrchestratorOptions::from(&cfg);
    options.pool = None;
    let mut orchestrator = Orchestrator::new(options)?;
    if let Some(size) = pool {
        orchestrator.pool(size, mode)?;
    }

    let outcomes: Rc<RefCell<Vec<(usize, i64)>>> = Rc::new(RefCell::new(Vec::new()));
    for (index, cmd) in args.commands.iter().enumerate() {
        let task = build_command_task(&args, index, cmd, cwd.clone(), &outcomes);
        orchestrator.add(task, 0)?;
    }

    let groups = orchestrator.run(mode)?;
    debug!(?groups, "started remaining groups");
    orchestrator.wait(None)?;

    if !mode.is_join() {
        info!(commands = args.commands.len(), "detached commands finished");
        return Ok(0);
    }

    let outcomes = outcomes.borrow();
    let failed = outcomes.iter().filter(|(_, code)| *code != 0).count();
    let missing = args.commands.len().saturating_sub(outcomes.len());
    info!(failed, missing, "all commands finished");

    Ok(if failed == 0 && missing == 0 { 0 } else { 1 })
}

fn build_command_task(
    args: &CliArgs,
    index: usize,
    cmd: &str,
    cwd: PathBuf,
    outcomes: &Rc<RefCell<Vec<(usize, i64)>>>,
) -> Rc<RefCell<CallbackTask>> {
    let label = cmd.to_string();
    let outcomes = Rc::clone(outcomes);

    let mut task = command::shell_task(cmd, cwd)
        .with_priority(args.priority)
        .with_future(move |result, _state| {
            let code = result.as_int().unwrap_or(-1);
            println!("[{index}] exit {code}: {label}");
            outcomes.borrow_mut().push((index, code));
        });
    if let Some(title) = &args.title {
        task = task.with_title(title.clone());
    }

    debug!(index, cmd, priority = task.priority(), "queued command");
    task.into_ref()
}

fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    if let Some(path) = &args.config {
        return load_and_validate(path).with_context(|| format!("loading config {path}"));
    }

    let path = default_config_path();
    if path.exists() {
        load_and_validate(&path).with_context(|| format!("loading config {}", path.display()))
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        Ok(ConfigFile::default())
    }
}

fn resolve_mode(args: &CliArgs, cfg: &ConfigFile) -> JoinMode {
    if args.detach {
        JoinMode::Detach
    } else {
        cfg.pool.map(|p| p.mode).unwrap_or(JoinMode::Join)
    }
}

/// Simple dry-run output: print settings and commands.
fn print_dry_run(args: &CliArgs, cfg: &ConfigFile, mode: JoinMode, pool: Option<usize>) {
    println!("forkpool dry-run");
    println!("  engine.pid_file = {}", cfg.engine.pid_file.display());
    println!("  engine.shm_namespace = {}", cfg.engine.shm_namespace);
    match pool {
        Some(size) => println!("  pool = {size} ({mode})"),
        None => println!("  pool = none ({mode})"),
    }
    println!("  priority = {}", args.priority);
    if let Some(title) = &args.title {
        println!("  title = {title}");
    }
    println!();

    println!("commands ({}):", args.commands.len());
    for (index, cmd) in args.commands.iter().enumerate() {
        println!("  [{index}] {cmd}");
    }

    debug!("dry-run complete (no execution)");
}
