// src/group/batch_group.rs

use std::collections::BTreeMap;

use nix::sys::signal::Signal;
use nix::unistd::{Pid, getpid};

use crate::channel::SlotFlags;
use crate::errors::{ForkpoolError, Result};
use crate::group::child::{self, EXIT_FAILED, EXIT_OK};
use crate::group::{GroupCore, GroupEnv, GroupId, GroupStatus, RunGroup, WaitSummary};
use crate::signal::SignalDispatcher;
use crate::task::{BatchOutput, BatchRef, BatchTask};
use crate::value::Value;

/// Run group with one child per item of a batch task.
///
/// Items are snapshotted at construction; later edits to the batch task do
/// not affect a running group. Results always travel back through the
/// shared channel.
pub struct BatchGroup {
    core: GroupCore,
    task: BatchRef,
    items: Vec<Value>,
    each_result: bool,
}

impl std::fmt::Debug for BatchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGroup")
            .field("id", &self.core.id)
            .field("status", &self.core.status)
            .field("items", &self.items.len())
            .field("each_result", &self.each_result)
            .finish()
    }
}

impl BatchGroup {
    pub fn new(task: BatchRef, env: GroupEnv) -> Result<Self> {
        let (items, each_result) = {
            let t = task.borrow();
            (t.items().to_vec(), t.is_each_result())
        };

        let core = GroupCore::new(items.len(), env)?;
        core.logger
            .debug(format_args!("{} item(s), each_result {each_result}", items.len()));

        Ok(Self {
            core,
            task,
            items,
            each_result,
        })
    }

    pub fn task(&self) -> &BatchRef {
        &self.task
    }

    fn run_child(&self, position: usize) -> i32 {
        let mut task = self.task.borrow_mut();

        if let Err(err) = task.prepare() {
            self.core
                .logger
                .error(format_args!("cannot prepare batch: {err}"));
            return fail(&mut task, err.into());
        }
        child::register(&self.core.env.registry, task.logger());

        match self.run_item(&mut task, position) {
            Ok(()) => EXIT_OK,
            Err(err) => fail(&mut task, err),
        }
    }

    fn run_item(&self, task: &mut BatchTask, position: usize) -> anyhow::Result<()> {
        child::apply_settings(task.priority(), task.title(), task.logger())?;

        let item = &self.items[position];
        task.logger()
            .debug(format_args!("executing item {position}"));
        task.signals_mut().poll();
        let value = child::guarded(|| task.execute_item(position, item))?;
        // A default signal recorded during the handler ends the child here,
        // before the slot is written.
        task.signals_mut().poll();

        let pid = getpid();
        let offset = u16::try_from(position)?;
        let written =
            self.core
                .env
                .channel
                .write(GroupCore::slot_id(pid), offset, &value, SlotFlags::empty())?;
        if written == 0 {
            anyhow::bail!("could not store the result of item {position}");
        }
        Ok(())
    }

    /// Read the result a reaped child left behind.
    fn collect(&self, pid: Pid, exit_code: i32) -> Option<(usize, Value)> {
        match self.core.env.channel.read(GroupCore::slot_id(pid), true) {
            Ok((value, offset)) => Some((usize::from(offset), value)),
            Err(ForkpoolError::SlotMissing(_)) if exit_code != EXIT_OK => None,
            Err(ForkpoolError::SlotMissing(_)) => {
                self.core
                    .logger
                    .warning(format_args!("return data for {pid} not found"));
                None
            }
            Err(e) => {
                self.core
                    .logger
                    .error(format_args!("cannot read result of {pid}: {e}"));
                None
            }
        }
    }
}

fn fail(task: &mut BatchTask, err: anyhow::Error) -> i32 {
    if let Err(err) = task.fail(err) {
        task.logger()
            .debug(format_args!("batch failure left unhandled: {err:#}"));
    }
    EXIT_FAILED
}

impl RunGroup for BatchGroup {
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
        self.items.len()
    }

    fn run(&mut self) -> Result<()> {
        self.core.ensure_not_started()?;

        let mut spawned = Ok(());
        for position in 0..self.items.len() {
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
        let mut results = BTreeMap::new();

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

            let Some((position, value)) = self.collect(pid, exit_code) else {
                continue;
            };

            if self.each_result {
                self.task
                    .borrow_mut()
                    .complete(BatchOutput::Item { position, value }, EXIT_OK);
            } else {
                results.insert(position, value);
            }
        }

        if !self.each_result {
            self.task
                .borrow_mut()
                .complete(BatchOutput::All(results), EXIT_OK);
        }

        self.core.advance(GroupStatus::Complete);
        self.core.log_summary(&summary);
        Ok(summary)
    }

    fn stop(&mut self, signal: Signal) -> Result<()> {
        self.core.stop(signal)
    }
}
