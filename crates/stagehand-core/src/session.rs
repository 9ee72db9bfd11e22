#![forbid(unsafe_code)]

//! The scoped draft-to-commit transaction wrapping one envelope's handling.
//!
//! A [`MutationSession`] owns a working copy cloned from the model's current
//! snapshot. Handlers mutate the working copy (through
//! [`StateCell`](crate::StateCell) views) or substitute it wholesale; either
//! marks the session changed. Closing the session with [`end`] freezes the
//! working copy into the next snapshot and expires the prior one — or
//! discards it untouched, producing nothing.
//!
//! Exactly one session may be open per model at any instant. The model's
//! [`SessionGate`] enforces this; a second `begin` against an open gate is a
//! fatal programmer error surfaced as `ConcurrentMutationViolation`. The
//! dispatch loop opens and closes exactly one session per envelope.
//!
//! `end` consumes the session and moves the draft out, so draft access after
//! close is unrepresentable rather than a runtime check.
//!
//! [`end`]: MutationSession::end

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{DispatchError, DispatchResult};
use crate::keys::ModelId;
use crate::snapshot::Snapshot;

/// Exclusivity gate for one model's mutation sessions. Owned by the model
/// record, shared with each session it opens.
#[derive(Debug, Default)]
pub struct SessionGate {
    open: Cell<bool>,
}

impl SessionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }
}

/// One open draft-to-commit transaction over a model's state.
pub struct MutationSession<S> {
    model_id: ModelId,
    base: Rc<Snapshot<S>>,
    draft: S,
    changed: Cell<bool>,
    gate: Rc<SessionGate>,
}

impl<S: Clone> MutationSession<S> {
    /// Open a session over `base`, seeding the working copy from it.
    ///
    /// Fails with `ConcurrentMutationViolation` if `gate` is already open.
    pub fn begin(base: Rc<Snapshot<S>>, gate: Rc<SessionGate>) -> DispatchResult<Self> {
        if gate.open.get() {
            return Err(DispatchError::ConcurrentMutationViolation(
                base.model_id().clone(),
            ));
        }
        let draft = base.try_read()?.clone();
        gate.open.set(true);
        Ok(Self {
            model_id: base.model_id().clone(),
            base,
            draft,
            changed: Cell::new(false),
            gate,
        })
    }

    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Read the working copy.
    #[must_use]
    pub fn draft(&self) -> &S {
        &self.draft
    }

    /// The working copy and its changed flag, for stage delivery.
    pub fn draft_parts(&mut self) -> (&mut S, &Cell<bool>) {
        (&mut self.draft, &self.changed)
    }

    /// Wholesale-substitute the working copy. Marks the session changed.
    pub fn replace(&mut self, next: S) {
        self.draft = next;
        self.changed.set(true);
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changed.get()
    }

    /// Close the session.
    ///
    /// With no changes, the working copy is discarded and nothing is
    /// returned. With changes, the working copy is frozen into the next
    /// snapshot (version + 1), the base snapshot is marked expired, and the
    /// new snapshot is returned for the caller to publish.
    #[must_use = "a changed session's snapshot must be installed and broadcast"]
    pub fn end(self) -> Option<Rc<Snapshot<S>>> {
        self.gate.open.set(false);
        if !self.changed.get() {
            return None;
        }
        self.base.mark_expired();
        Some(Rc::new(Snapshot::new(
            self.model_id,
            self.base.version() + 1,
            self.draft,
        )))
    }
}
