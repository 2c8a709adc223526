// src/engine/orchestrator.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::unistd::{Pid, getpid};

use crate::channel::{DEFAULT_NAMESPACE, ShmChannel};
use crate::config::default_pid_file;
use crate::engine::buffer::PriorityBuffer;
use crate::errors::{ForkpoolError, Result};
use crate::group::{
    BatchGroup, GroupEnv, GroupId, GroupStatus, MAX_GROUP_SIZE, RunGroup, TaskGroup, WaitSummary,
};
use crate::logging::Logger;
use crate::process;
use crate::registry::{PidRegistry, RegistryHandle};
use crate::signal::SignalDispatcher;
use crate::task::{BatchRef, Submission, TaskRef};
use crate::types::JoinMode;

/// Synchronous run+wait threshold configured with [`Orchestrator::pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub size: usize,
    pub mode: JoinMode,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Backing file of the pid registry.
    pub pid_file: PathBuf,
    /// Prefix of shared slot names.
    pub shm_namespace: String,
    pub pool: Option<PoolOptions>,
    /// `chdir("/")` and `umask(0)` on construction.
    pub reset_environment: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            shm_namespace: DEFAULT_NAMESPACE.to_string(),
            pool: None,
            reset_environment: true,
        }
    }
}

/// Accepts tasks, buffers them by priority and turns them into run groups.
///
/// Batch tasks get one [`BatchGroup`] each; all buffered plain tasks share
/// one [`TaskGroup`] per [`Orchestrator::run`] call.
pub struct Orchestrator {
    registry: RegistryHandle,
    channel: ShmChannel,
    jobs: PriorityBuffer<TaskRef>,
    batches: PriorityBuffer<BatchRef>,
    groups: BTreeMap<GroupId, Box<dyn RunGroup>>,
    pool: Option<PoolOptions>,
    signals: SignalDispatcher,
    logger: Logger,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("jobs", &self.jobs.len())
            .field("batches", &self.batches.len())
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Result<Self> {
        let registry = PidRegistry::open(&options.pid_file)?;
        Self::with_registry(options, registry)
    }

    /// Build an orchestrator on an existing registry handle, e.g. one
    /// obtained from a [`crate::registry::RegistryTable`].
    pub fn with_registry(options: OrchestratorOptions, registry: RegistryHandle) -> Result<Self> {
        let logger = Logger::new("[main]");

        registry.borrow_mut().add(getpid().as_raw(), true, true)?;

        if options.reset_environment {
            process::reset_environment()?;
        }

        logger.debug(format_args!(
            "pid file {}, namespace {}",
            options.pid_file.display(),
            options.shm_namespace
        ));

        Ok(Self {
            registry,
            channel: ShmChannel::new(options.shm_namespace),
            jobs: PriorityBuffer::new(),
            batches: PriorityBuffer::new(),
            groups: BTreeMap::new(),
            pool: options.pool,
            signals: SignalDispatcher::new(Logger::new("[main][signal]")),
            logger,
        })
    }

    /// Buffer a task. When a pool threshold is set and the targeted buffer
    /// reaches it, everything buffered is run and waited for right away.
    pub fn add(&mut self, task: impl Into<Submission>, priority: i32) -> Result<()> {
        match task.into() {
            Submission::Job(task) => {
                self.jobs.push(task, priority);
                self.perform_pool(self.jobs.len())
            }
            Submission::Batch(task) => {
                self.batches.push(task, priority);
                self.perform_pool(self.batches.len())
            }
        }
    }

    /// Run and wait synchronously whenever `size` tasks are buffered.
    pub fn pool(&mut self, size: usize, mode: JoinMode) -> Result<&mut Self> {
        if size == 0 {
            return Err(ForkpoolError::InvalidArgument(
                "pool size must be at least 1".to_string(),
            ));
        }
        self.pool = Some(PoolOptions { size, mode });
        Ok(self)
    }

    fn perform_pool(&mut self, buffered: usize) -> Result<()> {
        let Some(pool) = self.pool else {
            return Ok(());
        };
        if buffered != pool.size {
            return Ok(());
        }

        self.logger
            .debug(format_args!("pool of {} filled, running", pool.size));
        self.run(pool.mode)?;
        self.wait(None)?;
        Ok(())
    }

    /// Turn everything buffered into groups and start them.
    ///
    /// Returns the ids of the groups started by this call. A batch that
    /// cannot form a group is dropped and its error returned once the other
    /// groups have started. Groups left unstarted by a failed fork stay
    /// registered and are started by the next call.
    pub fn run(&mut self, mode: JoinMode) -> Result<Vec<GroupId>> {
        self.prune();
        self.signals.install()?;

        let rejected = self.materialize(mode)?;

        let mut ids = Vec::new();
        for (id, group) in self.groups.iter_mut() {
            if group.status() != GroupStatus::Init {
                continue;
            }
            group.run()?;
            self.logger
                .debug(format_args!("group {id} started with {} child(ren)", group.len()));
            ids.push(*id);
        }

        match rejected {
            Some(err) => Err(err),
            None => Ok(ids),
        }
    }

    /// Move buffered work into unstarted groups.
    ///
    /// Returns the first batch construction error, if any.
    fn materialize(&mut self, mode: JoinMode) -> Result<Option<ForkpoolError>> {
        if self.jobs.len() > MAX_GROUP_SIZE {
            return Err(ForkpoolError::InvalidArgument(format!(
                "{} buffered jobs exceed the group limit of {MAX_GROUP_SIZE}",
                self.jobs.len()
            )));
        }

        let env = GroupEnv {
            registry: self.registry.clone(),
            channel: self.channel.clone(),
        };

        let mut rejected = None;
        for batch in self.batches.drain_ordered() {
            match BatchGroup::new(batch, env.clone()) {
                Ok(group) => {
                    self.groups.insert(group.id(), Box::new(group));
                }
                Err(err) => {
                    self.logger.error(format_args!("dropping batch: {err}"));
                    rejected.get_or_insert(err);
                }
            }
        }

        if !self.jobs.is_empty() {
            let group = TaskGroup::new(self.jobs.drain_ordered(), mode, env)?;
            self.groups.insert(group.id(), Box::new(group));
        }

        Ok(rejected)
    }

    /// Block until the given group, or every active group, is done.
    pub fn wait(&mut self, group: Option<GroupId>) -> Result<BTreeMap<GroupId, WaitSummary>> {
        if let Some(id) = group {
            if !self.groups.contains_key(&id) {
                return Err(ForkpoolError::InvalidArgument(format!(
                    "group with id {id} does not exist or was not run"
                )));
            }
        }

        let mut summaries = BTreeMap::new();
        for (id, runner) in self.groups.iter_mut() {
            if group.is_some_and(|target| target != *id) {
                continue;
            }
            summaries.insert(*id, runner.wait(&mut self.signals)?);
        }

        self.prune();
        Ok(summaries)
    }

    /// Signal the children of the given group, or of every active group.
    pub fn stop(&mut self, signal: Signal, group: Option<GroupId>) -> Result<()> {
        for (id, runner) in self.groups.iter_mut() {
            if group.is_some_and(|target| target != *id) {
                continue;
            }
            self.logger.debug(format_args!("stopping group {id}"));
            runner.stop(signal)?;
        }
        Ok(())
    }

    /// Child pids of every active group.
    pub fn working_pids(&self) -> Vec<Pid> {
        self.groups
            .values()
            .flat_map(|g| g.pids().iter().copied())
            .collect()
    }

    /// Ids of groups that have not completed yet, started or not.
    pub fn active_groups(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub fn group_status(&self, id: GroupId) -> Option<GroupStatus> {
        self.groups.get(&id).map(|g| g.status())
    }

    pub fn buffered(&self) -> (usize, usize) {
        (self.jobs.len(), self.batches.len())
    }

    pub fn signals_mut(&mut self) -> &mut SignalDispatcher {
        &mut self.signals
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn channel(&self) -> &ShmChannel {
        &self.channel
    }

    fn prune(&mut self) {
        self.groups.retain(|_, g| !g.is_complete());
    }
}
