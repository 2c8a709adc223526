// src/signal/mod.rs

//! Cooperative signal handling.
//!
//! A [`SignalDispatcher`] owns a table of handlers. [`SignalDispatcher::install`]
//! points the OS at a recorder that only notes which signals arrived;
//! handlers run later, when the owner calls [`SignalDispatcher::poll`] from
//! its own control loop (the orchestrator while reaping children, a task
//! body inside its work loop).
//!
//! Default signals (`SIGINT`, `SIGHUP`, `SIGABRT`, `SIGTERM`) terminate the
//! owner after its handlers ran. Custom signals only run their handlers.

mod pending;

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};

use nix::sys::signal::Signal;

use crate::errors::Result;
use crate::logging::Logger;

pub use pending::clear_pending;

/// Signals every dispatcher listens to.
pub const DEFAULT_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGABRT,
    Signal::SIGTERM,
];

/// Signal handler. Errors are logged and never stop the remaining handlers.
pub type SignalHandler = Box<dyn FnMut(Signal) -> anyhow::Result<()>>;

/// What [`SignalDispatcher::poll`] does after handling a default signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Termination {
    /// Exit the process with status 0.
    #[default]
    Exit,
    /// Keep running; the owner inspects [`SignalDispatcher::is_terminated`].
    Continue,
}

pub struct SignalDispatcher {
    handlers: BTreeMap<Signal, Vec<SignalHandler>>,
    common: Vec<SignalHandler>,
    terminated: bool,
    termination: Termination,
    installed_custom: BTreeSet<Signal>,
    logger: Logger,
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDispatcher")
            .field("signals", &self.handlers.keys().collect::<Vec<_>>())
            .field("common", &self.common.len())
            .field("terminated", &self.terminated)
            .field("termination", &self.termination)
            .finish_non_exhaustive()
    }
}

impl Default for SignalDispatcher {
    fn default() -> Self {
        Self::new(Logger::new("[signal]"))
    }
}

impl SignalDispatcher {
    pub fn new(logger: Logger) -> Self {
        Self {
            handlers: BTreeMap::new(),
            common: Vec::new(),
            terminated: false,
            termination: Termination::default(),
            installed_custom: BTreeSet::new(),
            logger,
        }
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }

    pub fn logger_mut(&mut self) -> &mut Logger {
        &mut self.logger
    }

    /// Append `handler` to the list for `signal`, or make it the only one
    /// when `replace` is set.
    pub fn attach<F>(&mut self, signal: Signal, handler: F, replace: bool)
    where
        F: FnMut(Signal) -> anyhow::Result<()> + 'static,
    {
        let list = self.handlers.entry(signal).or_default();
        if replace {
            list.clear();
        }
        list.push(Box::new(handler));
    }

    /// Attach one shared handler to several signals.
    pub fn attach_many<F>(&mut self, signals: &[Signal], handler: F)
    where
        F: FnMut(Signal) -> anyhow::Result<()> + Clone + 'static,
    {
        for signal in signals {
            self.attach(*signal, handler.clone(), false);
        }
    }

    /// Attach a handler that runs for any default signal.
    pub fn attach_common<F>(&mut self, handler: F)
    where
        F: FnMut(Signal) -> anyhow::Result<()> + 'static,
    {
        self.common.push(Box::new(handler));
    }

    /// Remove every handler for `signal`. Unknown signals are ignored.
    pub fn detach(&mut self, signal: Signal) {
        self.handlers.remove(&signal);
    }

    /// Signals that currently have handlers, with their handler counts.
    pub fn handlers(&self) -> BTreeMap<Signal, usize> {
        self.handlers
            .iter()
            .map(|(signal, list)| (*signal, list.len()))
            .collect()
    }

    pub fn common_count(&self) -> usize {
        self.common.len()
    }

    /// Register the recorder with the OS for the default signals and for
    /// every signal with handlers. Safe to call repeatedly.
    pub fn install(&mut self) -> Result<()> {
        for signal in DEFAULT_SIGNALS {
            self.logger.debug(format_args!("registering signal {signal}"));
            pending::install_recorder(signal)?;
        }

        let custom: BTreeSet<Signal> = self
            .handlers
            .keys()
            .copied()
            .filter(|s| !DEFAULT_SIGNALS.contains(s))
            .collect();

        for signal in self.installed_custom.difference(&custom) {
            self.logger
                .debug(format_args!("restoring default action for {signal}"));
            pending::restore_default(*signal)?;
        }

        for signal in &custom {
            self.logger
                .debug(format_args!("registering custom signal {signal}"));
            pending::install_recorder(*signal)?;
        }

        self.installed_custom = custom;
        Ok(())
    }

    /// Run handlers for every signal received since the last poll.
    ///
    /// Returns whether a default signal has been observed. Under
    /// [`Termination::Exit`] a default signal ends the process instead.
    pub fn poll(&mut self) -> bool {
        for signal in pending::drain() {
            self.dispatch(signal);
        }
        self.terminated
    }

    /// Poll, then report whether termination was requested.
    pub fn is_terminated(&mut self) -> bool {
        self.poll()
    }

    /// Deliver `signal` as if it had just been received.
    pub fn dispatch(&mut self, signal: Signal) {
        if !DEFAULT_SIGNALS.contains(&signal) {
            if let Some(list) = self.handlers.get_mut(&signal) {
                run_handlers(&self.logger, list, signal);
            }
            return;
        }

        self.logger.warning(format_args!(
            "signal {signal} caught by {}",
            nix::unistd::getpid()
        ));
        self.terminated = true;

        if let Some(list) = self.handlers.get_mut(&signal) {
            run_handlers(&self.logger, list, signal);
        }
        run_handlers(&self.logger, &mut self.common, signal);

        if self.termination == Termination::Exit {
            std::process::exit(0);
        }
    }
}

fn run_handlers(logger: &Logger, handlers: &mut [SignalHandler], signal: Signal) {
    for handler in handlers.iter_mut() {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(signal))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger.error(format_args!("signal handler for {signal} failed: {err:#}")),
            Err(_) => logger.error(format_args!("signal handler for {signal} panicked")),
        }
    }
}
