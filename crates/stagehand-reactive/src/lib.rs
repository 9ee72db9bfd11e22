#![forbid(unsafe_code)]

//! Multicast notification primitives for stagehand.
//!
//! This crate provides the ordered broadcast channel the runtime uses both to
//! publish model snapshots and to coordinate observer bookkeeping internally:
//!
//! - [`Subject`]: an ordered multicast channel with optional
//!   replay-last-value semantics and a one-shot completion signal.
//! - [`Observer`]: the receiving side; any `Fn(&T)` closure qualifies.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//!
//! # Architecture
//!
//! `Subject<T>` uses `Rc<RefCell<..>>` for single-threaded shared ownership.
//! No copy of the subscriber list is taken during an emission; instead,
//! structural changes (subscribe/unsubscribe) that occur while an emission is
//! iterating are queued and applied when the outermost iteration finishes.
//!
//! # Invariants
//!
//! 1. Observers are notified in subscription order.
//! 2. A single emission delivers to exactly the observers that were live when
//!    it began; subscriptions added or dropped mid-emission take effect for
//!    the next emission.
//! 3. A nested `emit`/`complete` issued from inside an observer callback runs
//!    immediately against the live observer list.
//! 4. After `complete()`, `emit` is a no-op and `complete` is idempotent.
//! 5. A replaying subject delivers its cached value synchronously to each new
//!    observer before `subscribe` returns.

pub mod subject;
pub mod subscription;

pub use subject::{Observer, Subject};
pub use subscription::Subscription;
