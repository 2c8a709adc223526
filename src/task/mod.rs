// src/task/mod.rs

//! Units of work.
//!
//! - [`Task`] is what a plain run group forks a child for.
//! - [`CallbackTask`] wraps one closure plus fixed extra arguments.
//! - [`BatchTask`] applies one handler to every item of a list; each item
//!   gets its own child.
//!
//! Tasks are shared by reference between the caller and the group that
//! runs them. Everything up to `complete` in join mode happens in the child,
//! on the child's copy of the task.

pub mod batch;
pub mod callback;

use std::cell::RefCell;
use std::rc::Rc;

use nix::unistd::getpid;

use crate::errors::Result;
use crate::logging::Logger;
use crate::signal::SignalDispatcher;
use crate::value::Value;

pub use batch::{BatchOutput, BatchTask};
pub use callback::CallbackTask;

/// Outcome of the most recent execution, as seen by whoever called
/// `complete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    pub result: Value,
    pub exit_code: i32,
}

/// A unit of work a plain run group can execute.
pub trait Task {
    /// Short label used in log scopes (`[<kind>][<pid>]`).
    fn kind(&self) -> &'static str;

    /// Get ready to run inside the child: install the task's signal table
    /// and scope its logger. Must be idempotent.
    fn prepare(&mut self) -> Result<()>;

    /// Run the body.
    fn execute(&mut self) -> anyhow::Result<Value>;

    /// Record a result and run the completion continuation, if any.
    fn complete(&mut self, result: Value, exit_code: i32);

    /// Handle a failed execution. An `Err` means nobody handled it.
    fn fail(&mut self, error: anyhow::Error) -> anyhow::Result<()>;

    fn priority(&self) -> i32;

    fn title(&self) -> Option<&str>;

    fn state(&self) -> &TaskState;

    fn result(&self) -> &Value {
        &self.state().result
    }

    fn exit_code(&self) -> i32 {
        self.state().exit_code
    }

    fn signals_mut(&mut self) -> &mut SignalDispatcher;

    fn logger(&self) -> &Logger;
}

/// Task shared between a caller and a run group.
pub type TaskRef = Rc<RefCell<dyn Task>>;

/// Shared batch task.
pub type BatchRef = Rc<RefCell<BatchTask>>;

/// Something the orchestrator can buffer.
pub enum Submission {
    Job(TaskRef),
    Batch(BatchRef),
}

impl<T: Task + 'static> From<Rc<RefCell<T>>> for Submission {
    fn from(task: Rc<RefCell<T>>) -> Self {
        Submission::Job(task)
    }
}

impl From<BatchRef> for Submission {
    fn from(task: BatchRef) -> Self {
        Submission::Batch(task)
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Job(task) => write!(f, "Job({})", task.borrow().kind()),
            Submission::Batch(task) => write!(f, "Batch({} items)", task.borrow().items().len()),
        }
    }
}

/// View of the running task handed to bodies.
pub struct TaskContext<'a> {
    logger: &'a Logger,
    signals: &'a mut SignalDispatcher,
}

impl<'a> TaskContext<'a> {
    pub fn new(logger: &'a Logger, signals: &'a mut SignalDispatcher) -> Self {
        Self { logger, signals }
    }

    pub fn pid(&self) -> i32 {
        getpid().as_raw()
    }

    pub fn logger(&self) -> &Logger {
        self.logger
    }

    pub fn signals_mut(&mut self) -> &mut SignalDispatcher {
        self.signals
    }

    /// Handle pending signals and report whether a default signal arrived.
    ///
    /// Long-running bodies call this in their work loop.
    pub fn is_terminated(&mut self) -> bool {
        self.signals.is_terminated()
    }
}

/// Fields every task kind carries.
#[derive(Debug)]
pub(crate) struct TaskCore {
    pub(crate) priority: i32,
    pub(crate) title: Option<String>,
    pub(crate) state: TaskState,
    pub(crate) signals: SignalDispatcher,
    pub(crate) logger: Logger,
    prepared: bool,
}

impl TaskCore {
    pub(crate) fn new(kind: &str) -> Self {
        Self {
            priority: 0,
            title: None,
            state: TaskState::default(),
            signals: SignalDispatcher::new(Logger::new(format!("[{kind}][signal]"))),
            logger: Logger::new(format!("[{kind}]")),
            prepared: false,
        }
    }

    pub(crate) fn prepare(&mut self, kind: &str) -> Result<()> {
        if self.prepared {
            return Ok(());
        }

        let pid = getpid();
        self.logger.set_scope(format!("[{kind}][{pid}]"));
        self.signals
            .logger_mut()
            .set_scope(format!("[{kind}][{pid}][signal]"));
        self.signals.install()?;
        self.prepared = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_defaults_to_null_and_zero() {
        let state = TaskState::default();
        assert_eq!(state.result, Value::Null);
        assert_eq!(state.exit_code, 0);
    }

    #[test]
    fn submissions_route_by_kind() {
        let job = CallbackTask::new(|_, _| Ok(Value::Null)).into_ref();
        let batch = BatchTask::new(|_, _, v| Ok(v.clone())).into_ref();

        assert!(matches!(Submission::from(job), Submission::Job(_)));
        assert!(matches!(Submission::from(batch), Submission::Batch(_)));
    }
}
