#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use forkpool::task::{BatchOutput, BatchTask, CallbackTask, TaskState};
use forkpool::value::Value;

/// Collects whatever continuations report, in call order.
#[derive(Debug)]
pub struct Recorder<T> {
    seen: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            seen: Rc::clone(&self.seen),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.seen.borrow_mut().push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.seen.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.borrow().is_empty()
    }
}

/// Task returning `value`, with a continuation that records
/// `(result, exit_code)`.
pub fn recording_task(
    value: impl Into<Value>,
    recorder: &Recorder<(Value, i32)>,
) -> Rc<RefCell<CallbackTask>> {
    let value = value.into();
    let recorder = recorder.clone();
    CallbackTask::new(move |_, _| Ok(value.clone()))
        .with_future(move |result, state: &TaskState| {
            recorder.push((result.clone(), state.exit_code));
        })
        .into_ref()
}

/// Task whose body fails; its error handler creates `marker`.
pub fn failing_task(marker: PathBuf) -> Rc<RefCell<CallbackTask>> {
    CallbackTask::new(|_, _| anyhow::bail!("body failed on purpose"))
        .with_error(move |err, _| {
            std::fs::write(&marker, err.to_string())?;
            Ok(())
        })
        .into_ref()
}

/// Task that works in short slices until a default signal arrives.
pub fn cooperative_sleeper() -> Rc<RefCell<CallbackTask>> {
    CallbackTask::new(|ctx, _| {
        for _ in 0..500 {
            if ctx.is_terminated() {
                return Ok(Value::from("terminated"));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(Value::from("timed out"))
    })
    .into_ref()
}

/// Batch doubling every integer item, recording whatever it delivers.
pub fn doubling_batch(
    items: Vec<i64>,
    each_result: bool,
    recorder: &Recorder<BatchOutput>,
) -> Rc<RefCell<BatchTask>> {
    let recorder = recorder.clone();
    BatchTask::new(|_, _, item| {
        let n = item
            .as_int()
            .ok_or_else(|| anyhow::anyhow!("expected an integer item"))?;
        Ok(Value::Int(n * 2))
    })
    .with_items(items)
    .each_result(each_result)
    .with_future(move |output| {
        recorder.push(output.clone());
        Ok(())
    })
    .into_ref()
}

/// Task that sleeps for `ms` without ever looking at its signals, then
/// returns `value`.
pub fn sleeping_task(ms: u64, value: impl Into<Value>) -> Rc<RefCell<CallbackTask>> {
    let value = value.into();
    CallbackTask::new(move |_, _| {
        std::thread::sleep(Duration::from_millis(ms));
        Ok(value.clone())
    })
    .into_ref()
}
