// src/task/batch.rs

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::errors::Result;
use crate::logging::Logger;
use crate::signal::SignalDispatcher;
use crate::task::{TaskContext, TaskCore, TaskState};
use crate::value::Value;

type Handler = Box<dyn FnMut(&mut TaskContext<'_>, usize, &Value) -> anyhow::Result<Value>>;
type Continuation = Box<dyn FnMut(&BatchOutput) -> anyhow::Result<()>>;
type ErrorHandler = Box<dyn FnMut(&anyhow::Error) -> anyhow::Result<()>>;

const KIND: &str = "batch";

/// What a batch continuation receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    /// One item's result, delivered as soon as its child was reaped.
    Item { position: usize, value: Value },
    /// Every result keyed by input position. Items whose child produced
    /// no result are absent.
    All(BTreeMap<usize, Value>),
}

/// One handler applied to each item of a list, one child per item.
pub struct BatchTask {
    core: TaskCore,
    handler: Handler,
    items: Vec<Value>,
    each_result: bool,
    on_complete: Option<Continuation>,
    on_error: Option<ErrorHandler>,
    last_output: Option<BatchOutput>,
}

impl std::fmt::Debug for BatchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTask")
            .field("items", &self.items.len())
            .field("each_result", &self.each_result)
            .field("priority", &self.core.priority)
            .finish_non_exhaustive()
    }
}

impl BatchTask {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>, usize, &Value) -> anyhow::Result<Value> + 'static,
    {
        Self {
            core: TaskCore::new(KIND),
            handler: Box::new(handler),
            items: Vec::new(),
            each_result: false,
            on_complete: None,
            on_error: None,
            last_output: None,
        }
    }

    pub fn with_items<I, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.set_items(items);
        self
    }

    /// Deliver results one by one instead of once at the end.
    pub fn each_result(mut self, enabled: bool) -> Self {
        self.each_result = enabled;
        self
    }

    pub fn with_future<F>(mut self, continuation: F) -> Self
    where
        F: FnMut(&BatchOutput) -> anyhow::Result<()> + 'static,
    {
        self.on_complete = Some(Box::new(continuation));
        self
    }

    pub fn with_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&anyhow::Error) -> anyhow::Result<()> + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.core.priority = priority;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.core.title = Some(title.into());
        self
    }

    pub fn into_ref(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    pub fn set_items<I, V>(&mut self, items: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.items = items.into_iter().map(Into::into).collect();
    }

    pub fn add_item(&mut self, item: impl Into<Value>) {
        self.items.push(item.into());
    }

    pub fn add_items<I, V>(&mut self, items: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.items.extend(items.into_iter().map(Into::into));
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn is_each_result(&self) -> bool {
        self.each_result
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.core.prepare(KIND)
    }

    /// Apply the handler to one item.
    pub fn execute_item(&mut self, position: usize, item: &Value) -> anyhow::Result<Value> {
        let mut ctx = TaskContext::new(&self.core.logger, &mut self.core.signals);
        (self.handler)(&mut ctx, position, item)
    }

    /// Run the continuation with `output`. A failing continuation is handed
    /// to [`BatchTask::fail`]; if that fails too, the error is logged.
    pub fn complete(&mut self, output: BatchOutput, exit_code: i32) {
        self.core.state.exit_code = exit_code;

        let outcome = match self.on_complete.as_mut() {
            Some(continuation) => continuation(&output),
            None => Ok(()),
        };
        self.last_output = Some(output);

        if let Err(err) = outcome {
            if let Err(err) = self.fail(err) {
                self.core
                    .logger
                    .error(format_args!("unhandled batch continuation error: {err:#}"));
            }
        }
    }

    pub fn fail(&mut self, error: anyhow::Error) -> anyhow::Result<()> {
        match self.on_error.as_mut() {
            Some(handler) => handler(&error),
            None => {
                self.core.logger.error(format_args!("batch item failed: {error:#}"));
                Err(error)
            }
        }
    }

    /// Output passed to the most recent `complete` call.
    pub fn last_output(&self) -> Option<&BatchOutput> {
        self.last_output.as_ref()
    }

    pub fn priority(&self) -> i32 {
        self.core.priority
    }

    pub fn title(&self) -> Option<&str> {
        self.core.title.as_deref()
    }

    pub fn state(&self) -> &TaskState {
        &self.core.state
    }

    pub fn signals_mut(&mut self) -> &mut SignalDispatcher {
        &mut self.core.signals
    }

    pub fn logger(&self) -> &Logger {
        &self.core.logger
    }
}
