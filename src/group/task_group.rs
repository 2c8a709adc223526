// src/group/task_group.rs

use nix::sys::signal::Signal;
use nix::unistd::{Pid, getpid};

use crate::channel::SlotFlags;
use crate::errors::{ForkpoolError, Result};
use crate::group::child::{self, EXIT_FAILED, EXIT_OK};
use crate::group::{GroupCore, GroupEnv, GroupId, GroupStatus, RunGroup, WaitSummary};
use crate::signal::SignalDispatcher;
use crate::task::{Task, TaskRef};
use crate::types::JoinMode;

/// Run group over a fixed snapshot of plain tasks.
///
/// In join mode every child stores its result in a slot keyed by its own
/// pid, tagged with the task's position, and `wait` hands it to that task's
/// `complete`. In detach mode the child completes the task itself.
pub struct TaskGroup {
    core: GroupCore,
    tasks: Vec<TaskRef>,
    mode: JoinMode,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.core.id)
            .field("status", &self.core.status)
            .field("tasks", &self.tasks.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl TaskGroup {
    pub fn new(tasks: Vec<TaskRef>, mode: JoinMode, env: GroupEnv) -> Result<Self> {
        let core = GroupCore::new(tasks.len(), env)?;
        core.logger
            .debug(format_args!("{} job(s), mode {mode}", tasks.len()));
        Ok(Self { core, tasks, mode })
    }

    pub fn mode(&self) -> JoinMode {
        self.mode
    }

    pub fn tasks(&self) -> &[TaskRef] {
        &self.tasks
    }

    fn run_child(&self, position: usize) -> i32 {
        let mut task = self.tasks[position].borrow_mut();

        if let Err(err) = task.prepare() {
            self.core
                .logger
                .error(format_args!("cannot prepare task: {err}"));
            return fail(&mut *task, err.into());
        }
        child::register(&self.core.env.registry, task.logger());

        match self.run_entry(&mut *task, position) {
            Ok(()) => EXIT_OK,
            Err(err) => fail(&mut *task, err),
        }
    }

    fn run_entry(&self, task: &mut dyn Task, position: usize) -> anyhow::Result<()> {
        child::apply_settings(task.priority(), task.title(), task.logger())?;

        task.signals_mut().poll();
        task.logger().debug("executing worker");
        let value = child::guarded(|| task.execute())?;
        // A default signal recorded during the body ends the child here,
        // before anything is published.
        task.signals_mut().poll();

        if self.mode.is_join() {
            let pid = getpid();
            let offset = u16::try_from(position)?;
            task.logger().debug("writing result to shm");
            let written =
                self.core
                    .env
                    .channel
                    .write(GroupCore::slot_id(pid), offset, &value, SlotFlags::empty())?;
            if written == 0 {
                anyhow::bail!("could not store the result of {pid}");
            }
        } else {
            child::guarded(|| {
                task.complete(value, 0);
                Ok(())
            })?;
        }

        Ok(())
    }

    fn deliver(&self, pid: Pid, exit_code: i32) {
        let slot = GroupCore::slot_id(pid);
        match self.core.env.channel.read(slot, true) {
            Ok((value, offset)) => match self.tasks.get(usize::from(offset)) {
                Some(task) => task.borrow_mut().complete(value, exit_code),
                None => self.core.logger.error(format_args!(
                    "result of {pid} names unknown position {offset}"
                )),
            },
            Err(ForkpoolError::SlotMissing(_)) if exit_code != EXIT_OK => {
                self.core
                    .logger
                    .debug(format_args!("no return data for failed {pid}"));
            }
            Err(ForkpoolError::SlotMissing(_)) => {
                self.core
                    .logger
                    .warning(format_args!("return data for {pid} not found"));
            }
            Err(e) => self
                .core
                .logger
                .error(format_args!("cannot read result of {pid}: {e}")),
        }
    }
}

fn fail(task: &mut dyn Task, err: anyhow::Error) -> i32 {
    if let Err(err) = task.fail(err) {
        task.logger().error(format_args!("{err:#}"));
    }
    EXIT_FAILED
}

impl RunGroup for TaskGroup {
    fn id(&self) -> GroupId {
        self.core.id
    }

    fn status(&self) -> GroupStatus {
        self.core.status
    }

    fn pids(&self) -> &[Pid] {
        &self.core.pids
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn run(&mut self) -> Result<()> {
        self.core.ensure_not_started()?;

        let mut spawned = Ok(());
        for position in 0..self.tasks.len() {
            match child::spawn(&self.core.logger, || self.run_child(position)) {
                Ok(pid) => self.core.track(pid),
                Err(e) => {
                    spawned = Err(e);
                    break;
                }
            }
        }

        self.core.finish_spawn(spawned)
    }

    fn wait(&mut self, signals: &mut SignalDispatcher) -> Result<WaitSummary> {
        let mut summary = WaitSummary::default();
        match self.core.status {
            GroupStatus::Complete => return Ok(summary),
            GroupStatus::Init => {
                self.core.logger.warning("waiting on a group that never ran");
                return Ok(summary);
            }
            GroupStatus::Started | GroupStatus::Stopped => {}
        }

        let discard = self.core.status == GroupStatus::Stopped;
        let pids = self.core.pids.clone();

        for pid in pids {
            let reaped = self.core.reap(pid, signals)?;
            self.core.forget(pid);

            if discard {
                self.core.env.channel.delete(GroupCore::slot_id(pid));
                summary.stopped += 1;
                continue;
            }

            let exit_code = reaped.exit_code().unwrap_or(EXIT_FAILED);
            if exit_code == EXIT_OK {
                summary.complete += 1;
            } else {
                summary.failed += 1;
            }

            if self.mode.is_join() {
                self.deliver(pid, exit_code);
            }
        }

        self.core.advance(GroupStatus::Complete);
        self.core.log_summary(&summary);
        Ok(summary)
    }

    fn stop(&mut self, signal: Signal) -> Result<()> {
        self.core.stop(signal)
    }
}
