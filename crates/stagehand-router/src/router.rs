#![forbid(unsafe_code)]

//! The external-facing router surface.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::debug;

use stagehand_core::{
    BindingTable, DispatchError, DispatchResult, EventEnvelope, HandlerResult, ModelId,
    PartitionKey, Snapshot,
};
use stagehand_reactive::Subject;

use crate::model::{AnyModel, ModelHooks, ModelRecord, QueuedEvent};

struct RouterInner {
    models: RefCell<AHashMap<ModelId, Rc<dyn AnyModel>>>,
    /// Registration order, for broadcast.
    order: RefCell<Vec<ModelId>>,
}

/// Routes named events to registered models.
///
/// A `Router` is a cheap handle (`Rc` interior): clone it freely, including
/// into handlers that need to publish re-entrantly. All calls run on the
/// caller's stack; see the crate docs for the ordering guarantees.
#[derive(Clone)]
pub struct Router {
    inner: Rc<RouterInner>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RouterInner {
                models: RefCell::new(AHashMap::new()),
                order: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Start registering a model. Attach a binding table and optional hooks
    /// on the returned builder, then call
    /// [`register`](ModelBuilder::register).
    #[must_use]
    pub fn model<S: Clone + 'static>(&self, id: impl Into<ModelId>, initial: S) -> ModelBuilder<S> {
        ModelBuilder {
            router: self.clone(),
            id: id.into(),
            initial,
            bindings: BindingTable::builder().build(),
            hooks: ModelHooks::default(),
        }
    }

    /// Register a model with `bindings` and no hooks.
    pub fn register<S: Clone + 'static>(
        &self,
        id: impl Into<ModelId>,
        initial: S,
        bindings: BindingTable<S>,
    ) -> DispatchResult<ModelHandle<S>> {
        self.model(id, initial).bindings(bindings).register()
    }

    fn register_record<S: Clone + 'static>(
        &self,
        id: ModelId,
        initial: S,
        bindings: BindingTable<S>,
        hooks: ModelHooks<S>,
    ) -> DispatchResult<ModelHandle<S>> {
        let mut models = self.inner.models.borrow_mut();
        if models.contains_key(&id) {
            return Err(DispatchError::DuplicateIdentity(id));
        }
        debug!(model_id = %id, "model registered");
        let record = ModelRecord::new(id.clone(), initial, bindings, hooks);
        models.insert(id.clone(), Rc::clone(&record) as Rc<dyn AnyModel>);
        self.inner.order.borrow_mut().push(id);
        Ok(ModelHandle {
            record,
            router: self.clone(),
        })
    }

    fn lookup(&self, id: &ModelId) -> DispatchResult<Rc<dyn AnyModel>> {
        let models = self.inner.models.borrow();
        match models.get(id) {
            Some(model) if !model.is_disposed() => Ok(Rc::clone(model)),
            _ => Err(DispatchError::UnknownModel(id.clone())),
        }
    }

    /// Publish an event against `id`, draining its queue before returning
    /// (unless a drain is already running higher on the stack).
    pub fn publish<P: Any>(&self, id: &ModelId, event_type: &str, payload: P) -> DispatchResult {
        self.publish_raw(id, event_type, Rc::new(payload), None)
    }

    /// Publish with a partition scope: only binding groups whose partition
    /// matches `scope` observe the event.
    pub fn publish_scoped<P: Any>(
        &self,
        id: &ModelId,
        event_type: &str,
        payload: P,
        scope: impl Into<PartitionKey>,
    ) -> DispatchResult {
        self.publish_raw(id, event_type, Rc::new(payload), Some(scope.into()))
    }

    fn publish_raw(
        &self,
        id: &ModelId,
        event_type: &str,
        payload: Rc<dyn Any>,
        scope: Option<PartitionKey>,
    ) -> DispatchResult {
        let model = self.lookup(id)?;
        model.enqueue(QueuedEvent {
            event_type: Rc::from(event_type),
            payload,
            scope,
        });
        model.drain()
    }

    /// Publish the same event to every registered, non-disposed model, in
    /// registration order, independently queued per model.
    pub fn broadcast<P: Any>(&self, event_type: &str, payload: P) -> DispatchResult {
        let payload: Rc<dyn Any> = Rc::new(payload);
        let ids: Vec<ModelId> = self.inner.order.borrow().clone();
        for id in ids {
            // A handler earlier in the broadcast may have disposed this one.
            let Ok(model) = self.lookup(&id) else {
                continue;
            };
            model.enqueue(QueuedEvent {
                event_type: Rc::from(event_type),
                payload: Rc::clone(&payload),
                scope: None,
            });
            model.drain()?;
        }
        Ok(())
    }

    /// Dispose `id`: drop its queue, complete its snapshot stream, and
    /// unregister it. Subsequent publishes fail with `UnknownModel`.
    pub fn dispose(&self, id: &ModelId) -> DispatchResult {
        let removed = self.inner.models.borrow_mut().remove(id);
        let Some(model) = removed else {
            return Err(DispatchError::UnknownModel(id.clone()));
        };
        self.inner.order.borrow_mut().retain(|existing| existing != id);
        model.dispose();
        Ok(())
    }

    /// The model's current snapshot.
    pub fn current<S: Clone + 'static>(&self, id: &ModelId) -> DispatchResult<Rc<Snapshot<S>>> {
        Ok(self.typed_record::<S>(id)?.current())
    }

    /// The model's snapshot stream: a replaying subject that hands each new
    /// subscriber the current snapshot synchronously, then every snapshot a
    /// completed dispatch produces.
    pub fn snapshot_stream<S: Clone + 'static>(
        &self,
        id: &ModelId,
    ) -> DispatchResult<Subject<Rc<Snapshot<S>>>> {
        Ok(self.typed_record::<S>(id)?.snapshot_subject())
    }

    fn typed_record<S: Clone + 'static>(
        &self,
        id: &ModelId,
    ) -> DispatchResult<Rc<ModelRecord<S>>> {
        let model = self.lookup(id)?;
        // A lookup with the wrong state type behaves as an unknown model:
        // identity is effectively (id, S).
        model
            .as_rc_any()
            .downcast::<ModelRecord<S>>()
            .map_err(|_| DispatchError::UnknownModel(id.clone()))
    }

    #[must_use]
    pub fn is_registered(&self, id: &ModelId) -> bool {
        self.inner.models.borrow().contains_key(id)
    }

    #[must_use]
    pub fn model_count(&self) -> usize {
        self.inner.models.borrow().len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("models", &self.model_count())
            .finish()
    }
}

/// Registers one model with a router.
pub struct ModelBuilder<S> {
    router: Router,
    id: ModelId,
    initial: S,
    bindings: BindingTable<S>,
    hooks: ModelHooks<S>,
}

impl<S: Clone + 'static> ModelBuilder<S> {
    /// The handler binding table (defaults to empty).
    #[must_use]
    pub fn bindings(mut self, bindings: BindingTable<S>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Hook invoked once per envelope, before the preview stage. An error
    /// aborts the envelope: no stage delivers, no session opens.
    #[must_use]
    pub fn on_before_dispatch(
        mut self,
        hook: impl Fn(&ModelId, &S) -> HandlerResult + 'static,
    ) -> Self {
        self.hooks.pre = Some(Rc::new(hook));
        self
    }

    /// Hook invoked once per envelope, after the final stage (or
    /// cancellation) and after any commit broadcast. Errors propagate to the
    /// publisher without disturbing the completed progression.
    #[must_use]
    pub fn on_after_dispatch(
        mut self,
        hook: impl Fn(&ModelId, &S) -> HandlerResult + 'static,
    ) -> Self {
        self.hooks.post = Some(Rc::new(hook));
        self
    }

    /// Read-only inspection hook invoked after every successful commit with
    /// (previous value, next value, envelope).
    #[must_use]
    pub fn on_commit(mut self, hook: impl Fn(&S, &S, &EventEnvelope) + 'static) -> Self {
        self.hooks.inspector = Some(Rc::new(hook));
        self
    }

    /// Register the model. Fails with `DuplicateIdentity` if the id is
    /// taken.
    pub fn register(self) -> DispatchResult<ModelHandle<S>> {
        self.router
            .register_record(self.id, self.initial, self.bindings, self.hooks)
    }
}

/// Typed handle to a registered model, returned by registration.
///
/// Spares holders the registry lookup and the state-type recovery; all
/// operations route through the owning [`Router`], so a disposed model
/// behaves identically through either surface.
pub struct ModelHandle<S> {
    record: Rc<ModelRecord<S>>,
    router: Router,
}

impl<S: Clone + 'static> ModelHandle<S> {
    #[must_use]
    pub fn id(&self) -> &ModelId {
        self.record.id()
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn publish<P: Any>(&self, event_type: &str, payload: P) -> DispatchResult {
        self.router.publish(self.record.id(), event_type, payload)
    }

    pub fn publish_scoped<P: Any>(
        &self,
        event_type: &str,
        payload: P,
        scope: impl Into<PartitionKey>,
    ) -> DispatchResult {
        self.router
            .publish_scoped(self.record.id(), event_type, payload, scope)
    }

    /// The model's current snapshot.
    #[must_use]
    pub fn current(&self) -> Rc<Snapshot<S>> {
        self.record.current()
    }

    /// The model's snapshot stream.
    #[must_use]
    pub fn snapshots(&self) -> Subject<Rc<Snapshot<S>>> {
        self.record.snapshot_subject()
    }

    pub fn dispose(&self) -> DispatchResult {
        self.router.dispose(self.record.id())
    }
}

impl<S> Clone for ModelHandle<S> {
    fn clone(&self) -> Self {
        Self {
            record: Rc::clone(&self.record),
            router: self.router.clone(),
        }
    }
}

impl<S: Clone + 'static> fmt::Debug for ModelHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", self.record.id())
            .finish()
    }
}
