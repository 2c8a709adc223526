// src/signal/pending.rs

//! Async-signal-safe receipt of OS signals.
//!
//! The installed OS handler does exactly one thing: set the signal's bit in a
//! process-wide atomic mask. Everything else happens later, in
//! [`super::SignalDispatcher::poll`].

use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::errors::Result;

static PENDING: AtomicU64 = AtomicU64::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    if (0..64).contains(&signo) {
        PENDING.fetch_or(1u64 << signo, Ordering::SeqCst);
    }
}

/// Point `signal` at the recorder.
pub(crate) fn install_recorder(signal: Signal) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: `record_signal` only performs a lock-free atomic store.
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Restore the default disposition of `signal`.
pub(crate) fn restore_default(signal: Signal) -> Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installing SIG_DFL has no handler code to run.
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Take every signal received since the last call, in ascending order.
pub(crate) fn drain() -> Vec<Signal> {
    let mask = PENDING.swap(0, Ordering::SeqCst);
    (1..64)
        .filter(|signo| mask & (1u64 << signo) != 0)
        .filter_map(|signo| Signal::try_from(signo).ok())
        .collect()
}

/// Forget signals recorded before a fork; a child must not act on its
/// parent's deliveries.
pub fn clear_pending() {
    PENDING.store(0, Ordering::SeqCst);
}
