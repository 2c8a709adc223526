// src/task/callback.rs

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::Result;
use crate::logging::Logger;
use crate::signal::SignalDispatcher;
use crate::task::{Task, TaskContext, TaskCore, TaskState};
use crate::value::Value;

type Body = Box<dyn FnMut(&mut TaskContext<'_>, &[Value]) -> anyhow::Result<Value>>;
type Continuation = Box<dyn FnMut(&Value, &TaskState)>;
type ErrorHandler = Box<dyn FnMut(&anyhow::Error, &TaskState) -> anyhow::Result<()>>;

const KIND: &str = "callback";

/// Task running a single closure with fixed extra arguments.
///
/// ```no_run
/// use forkpool::task::CallbackTask;
/// use forkpool::value::Value;
///
/// let task = CallbackTask::new(|_ctx, args| Ok(Value::Int(args.len() as i64)))
///     .arg(1)
///     .arg("two")
///     .with_future(|result, _state| println!("got {result:?}"))
///     .into_ref();
/// ```
pub struct CallbackTask {
    core: TaskCore,
    body: Body,
    args: Vec<Value>,
    on_complete: Option<Continuation>,
    on_error: Option<ErrorHandler>,
}

impl std::fmt::Debug for CallbackTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTask")
            .field("args", &self.args)
            .field("priority", &self.core.priority)
            .field("title", &self.core.title)
            .field("state", &self.core.state)
            .finish_non_exhaustive()
    }
}

impl CallbackTask {
    pub fn new<F>(body: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>, &[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self {
            core: TaskCore::new(KIND),
            body: Box::new(body),
            args: Vec::new(),
            on_complete: None,
            on_error: None,
        }
    }

    /// Append a fixed argument passed to the body on every execution.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Continuation run by `complete`.
    pub fn with_future<F>(mut self, continuation: F) -> Self
    where
        F: FnMut(&Value, &TaskState) + 'static,
    {
        self.on_complete = Some(Box::new(continuation));
        self
    }

    /// Handler run by `fail`. Without one, failures propagate.
    pub fn with_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&anyhow::Error, &TaskState) -> anyhow::Result<()> + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// OS scheduling priority requested for the child (-20..=20).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.core.priority = priority;
        self
    }

    /// Process title for the child. An empty title fails the child.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.core.title = Some(title.into());
        self
    }

    pub fn into_ref(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }
}

impl Task for CallbackTask {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn prepare(&mut self) -> Result<()> {
        self.core.prepare(KIND)
    }

    fn execute(&mut self) -> anyhow::Result<Value> {
        let mut ctx = TaskContext::new(&self.core.logger, &mut self.core.signals);
        (self.body)(&mut ctx, &self.args)
    }

    fn complete(&mut self, result: Value, exit_code: i32) {
        self.core.state = TaskState { result, exit_code };
        if let Some(continuation) = self.on_complete.as_mut() {
            continuation(&self.core.state.result, &self.core.state);
        }
    }

    fn fail(&mut self, error: anyhow::Error) -> anyhow::Result<()> {
        match self.on_error.as_mut() {
            Some(handler) => handler(&error, &self.core.state),
            None => Err(error),
        }
    }

    fn priority(&self) -> i32 {
        self.core.priority
    }

    fn title(&self) -> Option<&str> {
        self.core.title.as_deref()
    }

    fn state(&self) -> &TaskState {
        &self.core.state
    }

    fn signals_mut(&mut self) -> &mut SignalDispatcher {
        &mut self.core.signals
    }

    fn logger(&self) -> &Logger {
        &self.core.logger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_sees_fixed_arguments() {
        let mut task = CallbackTask::new(|_, args| {
            let sum: i64 = args.iter().filter_map(Value::as_int).sum();
            Ok(Value::Int(sum))
        })
        .arg(2)
        .arg(40);

        assert_eq!(task.execute().unwrap(), Value::Int(42));
    }

    #[test]
    fn complete_stores_state_before_continuation() {
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let mut task = CallbackTask::new(|_, _| Ok(Value::Null)).with_future(move |result, state| {
            *s.borrow_mut() = Some((result.clone(), state.exit_code));
        });

        task.complete(Value::Int(100), 3);

        assert_eq!(*seen.borrow(), Some((Value::Int(100), 3)));
        assert_eq!(task.result(), &Value::Int(100));
        assert_eq!(task.exit_code(), 3);
    }

    #[test]
    fn fail_without_handler_propagates() {
        let mut task = CallbackTask::new(|_, _| anyhow::bail!("nope"));
        let err = task.execute().unwrap_err();
        assert!(task.fail(err).is_err());

        let mut handled = CallbackTask::new(|_, _| Ok(Value::Null)).with_error(|_, _| Ok(()));
        assert!(handled.fail(anyhow::anyhow!("nope")).is_ok());
    }

    #[test]
    fn builder_sets_priority_and_title() {
        let task = CallbackTask::new(|_, _| Ok(Value::Null))
            .with_priority(5)
            .with_title("worker");
        assert_eq!(Task::priority(&task), 5);
        assert_eq!(Task::title(&task), Some("worker"));
    }
}
