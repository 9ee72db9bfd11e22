#![forbid(unsafe_code)]

//! Per-model records: queue, snapshot, bindings, hooks, and the drain loop.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace};

use stagehand_core::{
    BindingTable, DispatchError, DispatchResult, EventEnvelope, HandlerResult, ModelId,
    MutationSession, PartitionKey, ProcessorHook, SessionGate, Snapshot,
};
use stagehand_reactive::Subject;

use crate::pipeline;

/// Pre/post processor: invoked once per envelope with (model id, current
/// value).
pub(crate) type Processor<S> = Rc<dyn Fn(&ModelId, &S) -> HandlerResult>;

/// Commit inspector: invoked after every successful commit with (previous
/// value, next value, envelope). Read-only by construction.
pub(crate) type CommitInspector<S> = Rc<dyn Fn(&S, &S, &EventEnvelope)>;

pub(crate) struct ModelHooks<S> {
    pub pre: Option<Processor<S>>,
    pub post: Option<Processor<S>>,
    pub inspector: Option<CommitInspector<S>>,
}

impl<S> Default for ModelHooks<S> {
    fn default() -> Self {
        Self {
            pre: None,
            post: None,
            inspector: None,
        }
    }
}

/// A published event waiting in a model's queue.
pub(crate) struct QueuedEvent {
    pub event_type: Rc<str>,
    pub payload: Rc<dyn Any>,
    pub scope: Option<PartitionKey>,
}

/// Everything the runtime owns for one registered model.
pub(crate) struct ModelRecord<S> {
    id: ModelId,
    bindings: BindingTable<S>,
    snapshot: RefCell<Rc<Snapshot<S>>>,
    queue: RefCell<VecDeque<QueuedEvent>>,
    dispatching: Cell<bool>,
    disposed: Cell<bool>,
    gate: Rc<SessionGate>,
    subject: Subject<Rc<Snapshot<S>>>,
    hooks: ModelHooks<S>,
}

impl<S: Clone + 'static> ModelRecord<S> {
    pub fn new(
        id: ModelId,
        initial: S,
        bindings: BindingTable<S>,
        hooks: ModelHooks<S>,
    ) -> Rc<Self> {
        let snapshot = Rc::new(Snapshot::new(id.clone(), 0, initial));
        let subject = Subject::replaying();
        // Seed the replay cache so the first subscriber sees the current
        // snapshot synchronously.
        subject.emit(Rc::clone(&snapshot));
        Rc::new(Self {
            id,
            bindings,
            snapshot: RefCell::new(snapshot),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            disposed: Cell::new(false),
            gate: Rc::new(SessionGate::new()),
            subject,
            hooks,
        })
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn current(&self) -> Rc<Snapshot<S>> {
        Rc::clone(&self.snapshot.borrow())
    }

    pub fn snapshot_subject(&self) -> Subject<Rc<Snapshot<S>>> {
        self.subject.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn enqueue(&self, event: QueuedEvent) {
        trace!(
            model_id = %self.id,
            event_type = %event.event_type,
            queue_depth = self.queue.borrow().len(),
            "event enqueued"
        );
        self.queue.borrow_mut().push_back(event);
    }

    /// Drain the queue to empty, unless a drain for this model is already
    /// running higher on the stack (the nested publish case — the outer loop
    /// picks the new envelope up after the in-flight one finishes).
    pub fn drain(&self) -> DispatchResult {
        if self.dispatching.get() {
            return Ok(());
        }
        self.dispatching.set(true);
        let result = self.drain_all();
        self.dispatching.set(false);
        result
    }

    fn drain_all(&self) -> DispatchResult {
        loop {
            if self.disposed.get() {
                self.queue.borrow_mut().clear();
                return Ok(());
            }
            let Some(next) = self.queue.borrow_mut().pop_front() else {
                return Ok(());
            };
            // An error stops the drain; whatever is still queued stays queued
            // and drains on the next publish.
            self.process(next)?;
        }
    }

    fn process(&self, event: QueuedEvent) -> DispatchResult {
        let base = self.current();
        let envelope = EventEnvelope::new(
            self.id.clone(),
            Rc::clone(&event.event_type),
            event.payload,
            event.scope,
        );
        trace!(
            model_id = %self.id,
            event_type = envelope.event_type(),
            version = base.version(),
            "dispatch begins"
        );

        if let Some(pre) = &self.hooks.pre {
            pre(&self.id, base.peek()).map_err(|source| DispatchError::ProcessorFailed {
                hook: ProcessorHook::Pre,
                model_id: self.id.clone(),
                source,
            })?;
        }

        let mut session = MutationSession::begin(Rc::clone(&base), Rc::clone(&self.gate))?;
        let delivered = pipeline::run(&self.bindings, &mut session, &envelope, base.peek());

        // The session closes whether or not delivery succeeded: draft changes
        // applied before a handler error are kept, not rolled back.
        if let Some(next) = session.end() {
            if let Some(inspector) = &self.hooks.inspector {
                inspector(base.peek(), next.peek(), &envelope);
            }
            *self.snapshot.borrow_mut() = Rc::clone(&next);
            debug!(
                model_id = %self.id,
                version = next.version(),
                event_type = envelope.event_type(),
                committed = envelope.is_committed(),
                "snapshot committed"
            );
            self.subject.emit(next);
        }

        delivered?;

        if let Some(post) = &self.hooks.post {
            let current = self.current();
            post(&self.id, current.peek()).map_err(|source| DispatchError::ProcessorFailed {
                hook: ProcessorHook::Post,
                model_id: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Mark disposed: drop queued events, complete the snapshot stream. An
    /// in-flight drain observes the flag after the current envelope and
    /// stops.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        debug!(model_id = %self.id, "model disposed");
        self.disposed.set(true);
        self.queue.borrow_mut().clear();
        self.subject.complete();
    }
}

/// Object-safe view of a [`ModelRecord`] for the heterogeneous registry.
pub(crate) trait AnyModel {
    fn id(&self) -> &ModelId;
    fn enqueue(&self, event: QueuedEvent);
    fn drain(&self) -> DispatchResult;
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
    fn as_rc_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<S: Clone + 'static> AnyModel for ModelRecord<S> {
    fn id(&self) -> &ModelId {
        ModelRecord::id(self)
    }

    fn enqueue(&self, event: QueuedEvent) {
        ModelRecord::enqueue(self, event);
    }

    fn drain(&self) -> DispatchResult {
        ModelRecord::drain(self)
    }

    fn dispose(&self) {
        ModelRecord::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        ModelRecord::is_disposed(self)
    }

    fn as_rc_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
