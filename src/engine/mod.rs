// src/engine/mod.rs

//! Orchestration layer.
//!
//! [`Orchestrator`] keeps two priority buffers (plain jobs and batches),
//! materialises run groups on [`Orchestrator::run`] and drives them through
//! wait and stop. The optional pool threshold turns `add` into a synchronous
//! backpressure valve.

pub mod buffer;
pub mod orchestrator;

pub use buffer::PriorityBuffer;
pub use orchestrator::{Orchestrator, OrchestratorOptions, PoolOptions};
pub use crate::types::JoinMode;
