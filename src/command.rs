// src/command.rs

//! Shell commands as tasks, used by the `forkpool` binary.

use std::cell::Cell;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::signal::Termination;
use crate::task::{CallbackTask, Task, TaskContext};
use crate::value::Value;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Build a task that runs `cmd` with `sh -c` in `cwd` and yields its exit
/// code as [`Value::Int`].
///
/// Default signals caught by the worker are forwarded to the shell; the
/// worker keeps waiting until the shell is gone.
pub fn shell_task(cmd: &str, cwd: impl Into<PathBuf>) -> CallbackTask {
    let shell = Rc::new(Cell::new(0));
    let cwd = cwd.into();

    let body_shell = Rc::clone(&shell);
    let mut task = CallbackTask::new(move |ctx, args| {
        let cmd = args
            .first()
            .and_then(Value::as_str)
            .context("shell task without a command")?;
        run_shell(ctx, cmd, &cwd, &body_shell)
    })
    .arg(cmd);

    let signals = task.signals_mut();
    signals.set_termination(Termination::Continue);
    signals.attach_common(move |signal| {
        let pid = shell.get();
        if pid > 0 {
            kill(Pid::from_raw(pid), signal)?;
        }
        Ok(())
    });

    task
}

fn run_shell(
    ctx: &mut TaskContext<'_>,
    cmd: &str,
    cwd: &Path,
    shell: &Cell<i32>,
) -> anyhow::Result<Value> {
    ctx.logger().debug(format_args!("starting `{cmd}`"));

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .spawn()
        .with_context(|| format!("spawning `{cmd}`"))?;
    shell.set(i32::try_from(child.id())?);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if ctx.is_terminated() {
            ctx.logger().debug("termination requested, waiting for shell");
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    shell.set(0);

    let code = exit_code(status);
    ctx.logger()
        .debug(format_args!("`{cmd}` exited with {code}"));
    Ok(Value::Int(i64::from(code)))
}

/// Exit code of a finished shell, `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
