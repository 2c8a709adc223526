// src/group/mod.rs

//! Run groups: fork one child per snapshot entry, reap them, deliver results.
//!
//! - [`TaskGroup`] runs a snapshot of plain tasks in join or detach mode.
//! - [`BatchGroup`] runs one child per item of a [`crate::task::BatchTask`].
//!
//! Status only moves forward: `Init → Started → {Stopped, Complete}` and
//! `Stopped → Complete`. A stopped group is still reaped so no zombies are
//! left behind, but the results of its children are discarded.

mod child;
pub mod batch_group;
pub mod task_group;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::channel::ShmChannel;
use crate::errors::{ForkpoolError, Result};
use crate::logging::Logger;
use crate::registry::RegistryHandle;
use crate::signal::SignalDispatcher;

pub use batch_group::BatchGroup;
pub use task_group::TaskGroup;

pub type GroupId = u64;

/// Largest snapshot a group accepts; positions travel as 16-bit offsets.
pub const MAX_GROUP_SIZE: usize = u16::MAX as usize + 1;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

fn next_group_id() -> GroupId {
    NEXT_GROUP_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupStatus {
    Init,
    Started,
    Stopped,
    Complete,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupStatus::Init => "init",
            GroupStatus::Started => "started",
            GroupStatus::Stopped => "stopped",
            GroupStatus::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Counters reported by [`RunGroup::wait`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitSummary {
    pub complete: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl WaitSummary {
    pub fn total(&self) -> usize {
        self.complete + self.failed + self.stopped
    }

    pub fn merge(&mut self, other: WaitSummary) {
        self.complete += other.complete;
        self.failed += other.failed;
        self.stopped += other.stopped;
    }
}

/// Collaborators every group needs.
#[derive(Debug, Clone)]
pub struct GroupEnv {
    pub registry: RegistryHandle,
    pub channel: ShmChannel,
}

pub trait RunGroup {
    fn id(&self) -> GroupId;

    fn status(&self) -> GroupStatus;

    /// Child pids in spawn order.
    fn pids(&self) -> &[Pid];

    /// Number of snapshot entries.
    fn len(&self) -> usize;

    fn is_complete(&self) -> bool {
        self.status() == GroupStatus::Complete
    }

    /// Fork one child per entry.
    fn run(&mut self) -> Result<()>;

    /// Reap every child in spawn order and deliver results.
    ///
    /// `signals` is polled after each reap and whenever the wait is
    /// interrupted.
    fn wait(&mut self, signals: &mut SignalDispatcher) -> Result<WaitSummary>;

    /// Send `signal` to every child. Never blocks and never escalates.
    fn stop(&mut self, signal: Signal) -> Result<()>;
}

/// Bookkeeping shared by both group kinds.
#[derive(Debug)]
struct GroupCore {
    id: GroupId,
    status: GroupStatus,
    pids: Vec<Pid>,
    env: GroupEnv,
    logger: Logger,
}

/// How one reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaped {
    /// Exit code, `128 + signal` for children killed by a signal.
    Exited(i32),
    /// Someone else already reaped the child.
    Lost,
}

impl Reaped {
    fn exit_code(self) -> Option<i32> {
        match self {
            Reaped::Exited(code) => Some(code),
            Reaped::Lost => None,
        }
    }
}

impl GroupCore {
    fn new(entries: usize, env: GroupEnv) -> Result<Self> {
        if entries == 0 {
            return Err(ForkpoolError::InvalidArgument(
                "cannot run 0 jobs".to_string(),
            ));
        }
        if entries > MAX_GROUP_SIZE {
            return Err(ForkpoolError::InvalidArgument(format!(
                "cannot run {entries} jobs in one group (limit {MAX_GROUP_SIZE})"
            )));
        }

        let id = next_group_id();
        Ok(Self {
            id,
            status: GroupStatus::Init,
            pids: Vec::with_capacity(entries),
            env,
            logger: Logger::new(format!("[runner][group:{id}]")),
        })
    }

    fn advance(&mut self, status: GroupStatus) {
        if status > self.status {
            self.logger
                .debug(format_args!("status {} -> {status}", self.status));
            self.status = status;
        }
    }

    fn ensure_not_started(&self) -> Result<()> {
        if self.status != GroupStatus::Init {
            return Err(ForkpoolError::Domain(format!(
                "group {} already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn stop(&mut self, signal: Signal) -> Result<()> {
        if self.status == GroupStatus::Complete {
            return Err(ForkpoolError::Domain(format!(
                "group {} already complete",
                self.id
            )));
        }

        for pid in &self.pids {
            self.logger.debug(format_args!("{signal} -> {pid}"));
            match kill(*pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => self
                    .logger
                    .warning(format_args!("cannot signal {pid}: {errno}")),
            }
        }

        self.advance(GroupStatus::Stopped);
        Ok(())
    }

    /// Block until `pid` ends, polling `signals` on every wake-up.
    fn reap(&self, pid: Pid, signals: &mut SignalDispatcher) -> Result<Reaped> {
        loop {
            match waitpid(pid, None) {
                Ok(status) => {
                    signals.poll();
                    match status {
                        WaitStatus::Exited(_, code) => return Ok(Reaped::Exited(code)),
                        WaitStatus::Signaled(_, sig, _) => {
                            return Ok(Reaped::Exited(128 + sig as i32));
                        }
                        _ => continue,
                    }
                }
                Err(Errno::EINTR) => {
                    signals.poll();
                }
                Err(Errno::ECHILD) => {
                    self.logger
                        .warning(format_args!("child {pid} was already reaped"));
                    return Ok(Reaped::Lost);
                }
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Record a freshly forked child, in memory and in the pid file.
    fn track(&mut self, pid: Pid) {
        self.pids.push(pid);
        if let Err(e) = self.env.registry.borrow_mut().add(pid.as_raw(), true, false) {
            self.logger
                .warning(format_args!("cannot register {pid}: {e}"));
        }
    }

    /// Settle the status after a spawn loop.
    ///
    /// A group that forked at least one child is `Started` even when a later
    /// fork failed, so the children it has are still reaped.
    fn finish_spawn(&mut self, spawned: Result<()>) -> Result<()> {
        if !self.pids.is_empty() {
            self.advance(GroupStatus::Started);
        }
        if let Err(e) = &spawned {
            self.logger.error(format_args!(
                "fork failed after {} child(ren): {e}",
                self.pids.len()
            ));
        }
        spawned
    }

    /// Drop a reaped child from the pid file.
    fn forget(&self, pid: Pid) {
        let mut registry = self.env.registry.borrow_mut();
        if let Err(e) = registry.remove(pid.as_raw(), true) {
            self.logger
                .warning(format_args!("cannot unregister {pid}: {e}"));
        }
    }

    /// Slot id for a child.
    fn slot_id(pid: Pid) -> u32 {
        pid.as_raw() as u32
    }

    fn log_summary(&self, summary: &WaitSummary) {
        self.logger.info(format_args!(
            "{} job(s) complete; {} failed; stopped: {}",
            summary.complete, summary.failed, summary.stopped
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_merge_and_total() {
        let mut a = WaitSummary {
            complete: 2,
            failed: 1,
            stopped: 0,
        };
        a.merge(WaitSummary {
            complete: 1,
            failed: 0,
            stopped: 3,
        });
        assert_eq!(a.total(), 7);
        assert_eq!(a.stopped, 3);
    }

    #[test]
    fn group_ids_increase() {
        let a = next_group_id();
        let b = next_group_id();
        assert!(b > a);
    }

    #[test]
    fn status_order_is_forward() {
        assert!(GroupStatus::Init < GroupStatus::Started);
        assert!(GroupStatus::Started < GroupStatus::Stopped);
        assert!(GroupStatus::Stopped < GroupStatus::Complete);
    }

    fn env(dir: &tempfile::TempDir) -> GroupEnv {
        GroupEnv {
            registry: crate::registry::PidRegistry::open(dir.path().join("g.pid")).unwrap(),
            channel: ShmChannel::new("unit-group"),
        }
    }

    #[test]
    fn partial_spawn_still_counts_as_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = GroupCore::new(3, env(&dir)).unwrap();

        core.track(Pid::from_raw(4242));
        let err = core
            .finish_spawn(Err(ForkpoolError::Sys(Errno::EAGAIN)))
            .unwrap_err();

        assert!(matches!(err, ForkpoolError::Sys(Errno::EAGAIN)));
        assert_eq!(core.status, GroupStatus::Started);
        assert!(core.env.registry.borrow().exists(4242));
    }

    #[test]
    fn failed_first_fork_leaves_group_unstarted() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = GroupCore::new(1, env(&dir)).unwrap();

        assert!(core.finish_spawn(Err(ForkpoolError::Sys(Errno::EAGAIN))).is_err());
        assert_eq!(core.status, GroupStatus::Init);
        assert!(core.ensure_not_started().is_ok());
    }
}
