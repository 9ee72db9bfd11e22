#![forbid(unsafe_code)]

//! stagehand public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use stagehand_core as core;
pub use stagehand_reactive as reactive;
pub use stagehand_router as router;

pub mod prelude {
    pub use stagehand_core::{
        BindingTable, BindingTableBuilder, DispatchError, DispatchResult, EventContext,
        EventEnvelope, ExpiryEnforcement, ExpirySettings, GroupBuilder, HandlerResult,
        ModelId, MutationSession, ObservationStage, PartitionKey, ProcessorHook, Snapshot,
        StageAction, StateCell,
    };
    pub use stagehand_reactive::{Observer, Subject, Subscription};
    pub use stagehand_router::{ModelBuilder, ModelHandle, Router};
}
