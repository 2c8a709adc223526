// src/group/child.rs

//! The part of a run group that happens inside a forked child.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use nix::unistd::{ForkResult, Pid, fork, getpid};

use crate::errors::{ForkpoolError, Result};
use crate::logging::Logger;
use crate::process;
use crate::registry::RegistryHandle;
use crate::signal;

pub(super) const EXIT_OK: i32 = 0;
pub(super) const EXIT_FAILED: i32 = 1;

/// Fork and run `body` in the child, which then exits with the returned
/// code. Returns the child's pid in the parent.
///
/// The child never returns from this function and never runs destructors of
/// the parent's state, so registries shared with the parent keep their file.
pub(super) fn spawn<F>(logger: &Logger, body: F) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    flush_std();

    // SAFETY: the engine is single threaded; the child only touches its own
    // copy of the address space and leaves through `process::exit`.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            logger.debug(format_args!("forked {child}"));
            Ok(child)
        }
        ForkResult::Child => {
            signal::clear_pending();
            let code = match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(code) => code,
                Err(_) => EXIT_FAILED,
            };
            flush_std();
            std::process::exit(code);
        }
    }
}

/// Record the calling child in the pid file.
pub(super) fn register(registry: &RegistryHandle, logger: &Logger) {
    if let Err(e) = registry.borrow_mut().add(getpid().as_raw(), true, false) {
        logger.warning(format_args!("cannot register child: {e}"));
    }
}

/// Apply the requested priority and title.
///
/// Both are best effort, except that an explicitly empty title is an error.
pub(super) fn apply_settings(priority: i32, title: Option<&str>, logger: &Logger) -> Result<()> {
    if title == Some("") {
        return Err(ForkpoolError::InvalidArgument(
            "process title must not be empty".to_string(),
        ));
    }

    logger.debug(format_args!("setting process priority {priority}"));
    if let Err(e) = process::set_priority(priority) {
        logger.warning(format_args!("cannot set priority {priority}: {e}"));
    }

    if let Some(title) = title {
        if let Err(e) = process::set_title(title) {
            logger.warning(format_args!("cannot set title {title:?}: {e}"));
        }
    }

    Ok(())
}

/// Run `f`, turning a panic into an error.
pub(super) fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn flush_std() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_turns_panics_into_errors() {
        let err = guarded::<()>(|| panic!("kaboom")).unwrap_err();
        assert!(err.to_string().contains("kaboom"));

        let ok = guarded(|| Ok(5)).unwrap();
        assert_eq!(ok, 5);
    }

    #[test]
    fn only_an_empty_title_is_fatal() {
        let logger = Logger::new("[test]");
        assert!(matches!(
            apply_settings(0, Some(""), &logger),
            Err(ForkpoolError::InvalidArgument(_))
        ));
        assert!(apply_settings(0, Some("bad\0title"), &logger).is_ok());
    }
}
