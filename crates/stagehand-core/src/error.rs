#![forbid(unsafe_code)]

//! Error taxonomy for contract violations and handler failures.
//!
//! Every variant except the two wrappers is a programmer-usage error, not a
//! transient condition: it is surfaced synchronously on the call that
//! violated the contract and never retried.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::keys::ModelId;
use crate::stage::{ObservationStage, StageAction};

/// Result alias for fallible dispatch operations.
pub type DispatchResult<T = ()> = Result<T, DispatchError>;

/// Outcome of a single handler or processor-hook invocation. A
/// `DispatchError` returned here (e.g. an illegal `cancel()` propagated with
/// `?`) reaches the publisher undecorated; any other error is wrapped with
/// the event type and stage.
pub type HandlerResult = Result<(), Box<dyn StdError>>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("model '{0}' is already registered")]
    DuplicateIdentity(ModelId),

    #[error("no model registered with id '{0}'")]
    UnknownModel(ModelId),

    #[error("a mutation session is already open for model '{0}'")]
    ConcurrentMutationViolation(ModelId),

    #[error("can not {action} event '{event_type}' at the {stage} stage")]
    IllegalStageTransition {
        action: StageAction,
        event_type: String,
        stage: ObservationStage,
    },

    #[error("event '{event_type}' for model '{model_id}' is already committed")]
    AlreadyCommitted {
        event_type: String,
        model_id: ModelId,
    },

    #[error("can not {action} an event from within a delivery predicate")]
    FilterContextViolation { action: StageAction },

    #[error("model '{0}' was accessed after being superseded by a newer snapshot")]
    ExpiredModelAccess(ModelId),

    #[error("handler for event '{event_type}' failed at the {stage} stage")]
    HandlerFailed {
        event_type: String,
        stage: ObservationStage,
        #[source]
        source: Box<dyn StdError>,
    },

    #[error("{hook} processor failed for model '{model_id}'")]
    ProcessorFailed {
        hook: ProcessorHook,
        model_id: ModelId,
        #[source]
        source: Box<dyn StdError>,
    },
}

impl DispatchError {
    /// Lift a handler error into the taxonomy: contract violations pass
    /// through unchanged, anything else is wrapped as [`Self::HandlerFailed`].
    #[must_use]
    pub fn from_handler(
        event_type: &str,
        stage: ObservationStage,
        source: Box<dyn StdError>,
    ) -> Self {
        match source.downcast::<DispatchError>() {
            Ok(violation) => *violation,
            Err(source) => Self::HandlerFailed {
                event_type: event_type.to_owned(),
                stage,
                source,
            },
        }
    }
}

/// Which per-envelope processor hook raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorHook {
    Pre,
    Post,
}

impl fmt::Display for ProcessorHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pre => "pre",
            Self::Post => "post",
        })
    }
}
