#![forbid(unsafe_code)]

//! Per-envelope observation pipeline.
//!
//! Drives one envelope through the stage machine:
//!
//! ```text
//! filter ─→ Preview ─→ Normal ─→ Committed ─→ Final ─→ done
//!              │
//!              └─ cancel() ─→ cancelled (remaining stages skipped)
//! ```
//!
//! The filter phase evaluates each matching group's delivery predicate once
//! against the pre-dispatch snapshot; excluded groups receive nothing at any
//! stage. Preview delivers the snapshot read-only. The three mutation stages
//! deliver the session's shared draft, so a mutation by an earlier binding
//! is immediately visible to later bindings in the same pass. Within a
//! stage, bindings fire in registration order; a handler error aborts the
//! remaining deliveries for the envelope and propagates, leaving the draft
//! as-is.

use tracing::{debug, trace};

use stagehand_core::{
    BindingTable, DispatchError, DispatchResult, EventContext, EventEnvelope, MutationSession,
    ObservationStage, StateAccess,
};

pub(crate) fn run<S: Clone + 'static>(
    bindings: &BindingTable<S>,
    session: &mut MutationSession<S>,
    envelope: &EventEnvelope,
    snapshot: &S,
) -> DispatchResult {
    // Filter phase: evaluate group predicates once, before any stage.
    let candidates = bindings.groups_matching(envelope);
    let mut admitted = Vec::with_capacity(candidates.len());
    {
        let ctx = EventContext::for_filter(envelope);
        for group in candidates {
            let admits = bindings.group_admits(group, snapshot, envelope, &ctx);
            if let Some(action) = envelope.filter_violation() {
                return Err(DispatchError::FilterContextViolation { action });
            }
            if admits {
                admitted.push(group);
            }
        }
    }

    let ctx = EventContext::for_stage(envelope);
    for stage in ObservationStage::ALL {
        envelope.advance_to(stage);
        trace!(
            model_id = %envelope.model_id(),
            event_type = envelope.event_type(),
            stage = %stage,
            "stage begins"
        );

        if stage == ObservationStage::Preview {
            for binding in bindings.stage_bindings(stage, envelope) {
                if !admitted.contains(&binding.group()) {
                    continue;
                }
                binding
                    .deliver(StateAccess::ReadOnly(snapshot), envelope, &ctx)
                    .map_err(|source| {
                        DispatchError::from_handler(envelope.event_type(), stage, source)
                    })?;
            }
            if envelope.is_cancelled() {
                debug!(
                    model_id = %envelope.model_id(),
                    event_type = envelope.event_type(),
                    "event cancelled at preview"
                );
                return Ok(());
            }
        } else {
            for binding in bindings.stage_bindings(stage, envelope) {
                if !admitted.contains(&binding.group()) {
                    continue;
                }
                let (value, changed) = session.draft_parts();
                binding
                    .deliver(StateAccess::Draft { value, changed }, envelope, &ctx)
                    .map_err(|source| {
                        DispatchError::from_handler(envelope.event_type(), stage, source)
                    })?;
            }
        }
    }
    Ok(())
}
