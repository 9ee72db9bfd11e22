#![forbid(unsafe_code)]

//! The stagehand runtime: model registry, observation pipeline, dispatch
//! loop, and the [`Router`] facade.
//!
//! # Model of execution
//!
//! Everything runs on the caller's stack, single-threaded. `publish` appends
//! an envelope to the target model's FIFO queue and, unless a drain for that
//! model is already running higher on the stack, drains the queue to empty:
//! each envelope is wrapped in its own mutation session, driven through the
//! observation stages, and — if the draft changed — committed and broadcast
//! before the next envelope is popped. Handlers that publish against their
//! own model never see their event reordered ahead of the in-flight one and
//! never cause a second concurrent loop for the same model.
//!
//! External asynchronous sources are not awaited anywhere inside; convert
//! them into ordinary `publish` calls from outside.
//!
//! # Invariants
//!
//! 1. Events against one model are totally ordered by publish sequence and
//!    fully drained before the outermost `publish` returns.
//! 2. At most one mutation session is open per model at any instant.
//! 3. Snapshot broadcasts happen in commit order, carrying strictly
//!    increasing versions.
//! 4. Different models have fully independent queues and loops.

mod model;
mod pipeline;
mod router;

pub use router::{ModelBuilder, ModelHandle, Router};
