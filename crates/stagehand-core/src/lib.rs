#![forbid(unsafe_code)]

//! Core vocabulary for the stagehand event-dispatch runtime.
//!
//! Everything here is single-threaded by contract: model state is shared via
//! `Rc`, interior mutability is `Cell`/`RefCell`, and nothing is `Send`. The
//! runtime crate (`stagehand-router`) drives these types; embedding
//! applications mostly touch [`BindingTable`], [`EventEnvelope`], and
//! [`Snapshot`].

pub mod binding;
pub mod envelope;
pub mod error;
pub mod expiry;
pub mod keys;
pub mod session;
pub mod snapshot;
pub mod stage;

pub use binding::{Binding, BindingTable, BindingTableBuilder, GroupBuilder, GroupId, StateAccess, StateCell};
pub use envelope::{EventContext, EventEnvelope};
pub use error::{DispatchError, DispatchResult, HandlerResult, ProcessorHook};
pub use expiry::{ExpiryEnforcement, ExpirySettings};
pub use keys::{ModelId, PartitionKey};
pub use session::{MutationSession, SessionGate};
pub use snapshot::Snapshot;
pub use stage::{ObservationStage, StageAction};
