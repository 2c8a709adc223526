// src/process.rs

//! Best-effort adjustments of the calling process.

use std::ffi::CString;

use nix::sys::stat::{Mode, umask};

use crate::errors::{ForkpoolError, Result};

pub const MIN_PRIORITY: i32 = -20;
pub const MAX_PRIORITY: i32 = 20;

/// Set the process title shown by `ps`/`top`.
///
/// Linux keeps at most 15 bytes; longer titles are truncated by the kernel.
pub fn set_title(title: &str) -> Result<()> {
    if title.is_empty() {
        return Err(ForkpoolError::InvalidArgument(
            "process title must not be empty".to_string(),
        ));
    }

    let name = CString::new(title).map_err(|_| {
        ForkpoolError::InvalidArgument(format!("process title contains NUL: {title:?}"))
    })?;

    #[cfg(target_os = "linux")]
    nix::sys::prctl::set_name(&name)?;

    #[cfg(not(target_os = "linux"))]
    let _ = name;

    Ok(())
}

/// Set the scheduling priority (nice value) of the calling process.
pub fn set_priority(priority: i32) -> Result<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(ForkpoolError::InvalidArgument(format!(
            "priority {priority} outside {MIN_PRIORITY}..={MAX_PRIORITY}"
        )));
    }

    // SAFETY: plain syscall on the calling process, no pointers involved.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, priority) };
    if rc == -1 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(())
}

/// Move to `/` and clear the file-creation mask.
///
/// Keeps a long-running parent from pinning a removable mount and makes the
/// modes of created pid files and slots predictable.
pub fn reset_environment() -> Result<()> {
    nix::unistd::chdir("/")?;
    umask(Mode::empty());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_title_is_rejected() {
        assert!(matches!(
            set_title(""),
            Err(ForkpoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        assert!(matches!(
            set_priority(21),
            Err(ForkpoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            set_priority(-21),
            Err(ForkpoolError::InvalidArgument(_))
        ));
    }
}
