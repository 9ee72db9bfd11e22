#![forbid(unsafe_code)]

//! In-flight event records and the stage-control surface.
//!
//! An [`EventEnvelope`] is created when an event is published and lives until
//! the final stage completes (or cancellation short-circuits the rest). Its
//! stage and cancel/commit flags are interior `Cell`s: the envelope is shared
//! immutably between the pipeline, handlers, and hooks, while the stage
//! machine advances underneath them.
//!
//! [`EventContext`] is the control half handed to predicates and handlers.
//! The same envelope backs both a *filter* context (stage-control actions are
//! contract violations) and a *stage* context (actions are checked against
//! the legality rules).

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{DispatchError, DispatchResult};
use crate::keys::{ModelId, PartitionKey};
use crate::stage::{ObservationStage, StageAction};

/// One published event's in-flight record.
pub struct EventEnvelope {
    event_type: Rc<str>,
    payload: Rc<dyn Any>,
    scope: Option<PartitionKey>,
    model_id: ModelId,
    stage: Cell<ObservationStage>,
    cancelled: Cell<bool>,
    committed: Cell<bool>,
    filter_violation: Cell<Option<StageAction>>,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        model_id: ModelId,
        event_type: impl Into<Rc<str>>,
        payload: Rc<dyn Any>,
        scope: Option<PartitionKey>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            scope,
            model_id,
            stage: Cell::new(ObservationStage::Preview),
            cancelled: Cell::new(false),
            committed: Cell::new(false),
            filter_violation: Cell::new(None),
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// The partition scope this event was published against, if any.
    #[must_use]
    pub fn scope(&self) -> Option<&PartitionKey> {
        self.scope.as_ref()
    }

    /// Typed view of the payload.
    #[must_use]
    pub fn payload<P: Any>(&self) -> Option<&P> {
        (*self.payload).downcast_ref()
    }

    #[must_use]
    pub fn stage(&self) -> ObservationStage {
        self.stage.get()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.get()
    }

    /// Advance to `stage`. Stages never regress; the dispatch pipeline is
    /// the only caller.
    pub fn advance_to(&self, stage: ObservationStage) {
        debug_assert!(stage >= self.stage.get());
        self.stage.set(stage);
    }

    /// The stage-control action illegally attempted from a delivery
    /// predicate, if any.
    #[must_use]
    pub fn filter_violation(&self) -> Option<StageAction> {
        self.filter_violation.get()
    }
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("event_type", &self.event_type)
            .field("model_id", &self.model_id)
            .field("scope", &self.scope)
            .field("stage", &self.stage.get())
            .field("cancelled", &self.cancelled.get())
            .field("committed", &self.committed.get())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextMode {
    Filter,
    Stage,
}

/// Stage-control surface handed to delivery predicates and handlers.
pub struct EventContext<'a> {
    envelope: &'a EventEnvelope,
    mode: ContextMode,
}

impl<'a> EventContext<'a> {
    /// Context for stage delivery: `cancel`/`commit` are checked against the
    /// stage legality rules.
    #[must_use]
    pub fn for_stage(envelope: &'a EventEnvelope) -> Self {
        Self {
            envelope,
            mode: ContextMode::Stage,
        }
    }

    /// Context for group delivery predicates: stage-control actions are
    /// contract violations.
    #[must_use]
    pub fn for_filter(envelope: &'a EventEnvelope) -> Self {
        Self {
            envelope,
            mode: ContextMode::Filter,
        }
    }

    /// Cancel the in-flight event: no further stages deliver.
    ///
    /// Legal only while the current stage is
    /// [`Preview`](ObservationStage::Preview).
    pub fn cancel(&self) -> DispatchResult {
        if self.mode == ContextMode::Filter {
            self.envelope.filter_violation.set(Some(StageAction::Cancel));
            return Err(DispatchError::FilterContextViolation {
                action: StageAction::Cancel,
            });
        }
        let stage = self.envelope.stage.get();
        if stage != ObservationStage::Preview {
            return Err(DispatchError::IllegalStageTransition {
                action: StageAction::Cancel,
                event_type: self.envelope.event_type().to_owned(),
                stage,
            });
        }
        self.envelope.cancelled.set(true);
        Ok(())
    }

    /// Mark the in-flight event committed. Later stages still deliver; the
    /// flag is observable via [`EventEnvelope::is_committed`].
    ///
    /// Legal only while the current stage is
    /// [`Normal`](ObservationStage::Normal), and only once per envelope.
    pub fn commit(&self) -> DispatchResult {
        if self.mode == ContextMode::Filter {
            self.envelope.filter_violation.set(Some(StageAction::Commit));
            return Err(DispatchError::FilterContextViolation {
                action: StageAction::Commit,
            });
        }
        if self.envelope.committed.get() {
            return Err(DispatchError::AlreadyCommitted {
                event_type: self.envelope.event_type().to_owned(),
                model_id: self.envelope.model_id().clone(),
            });
        }
        let stage = self.envelope.stage.get();
        if stage != ObservationStage::Normal {
            return Err(DispatchError::IllegalStageTransition {
                action: StageAction::Commit,
                event_type: self.envelope.event_type().to_owned(),
                stage,
            });
        }
        self.envelope.committed.set(true);
        Ok(())
    }
}
