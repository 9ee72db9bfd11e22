#![forbid(unsafe_code)]

//! Handler binding tables.
//!
//! A [`BindingTable`] is the ordered, immutable registration table the
//! dispatch pipeline routes envelopes through. It is built explicitly with
//! [`BindingTableBuilder`] at model-setup time; there is no runtime
//! re-registration and no reflection.
//!
//! Bindings are organized into *groups*. A group owns:
//!
//! - a [`PartitionKey`] naming the slice of model state its handlers operate
//!   on (scoped publishes only reach groups whose partition matches),
//! - an optional delivery predicate, evaluated once per envelope before the
//!   preview stage; a `false` excludes the group's bindings from **all**
//!   stages for that envelope,
//! - a lens pair projecting the partition type `P` out of the model state
//!   `S` (`P = S` via the identity lens for whole-model groups).
//!
//! Handlers are typed per stage: preview handlers get `&P` (read-only, no
//! draft exists yet), mutation-stage handlers get a [`StateCell`] draft view.
//! The lens composes at registration, so the stored table is uniform over
//! `S` and dispatch is a plain indexed walk.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::envelope::{EventContext, EventEnvelope};
use crate::error::HandlerResult;
use crate::keys::PartitionKey;
use crate::stage::ObservationStage;

/// Draft view of one state partition during mutation-capable stages.
///
/// Obtaining mutable access ([`get_mut`](Self::get_mut)) or substituting the
/// partition wholesale ([`replace`](Self::replace)) marks the enclosing
/// mutation session changed; a session whose draft was never marked produces
/// no new snapshot. Handlers that only read should use [`get`](Self::get).
pub struct StateCell<'a, P> {
    value: &'a mut P,
    changed: &'a Cell<bool>,
}

impl<'a, P> StateCell<'a, P> {
    pub(crate) fn new(value: &'a mut P, changed: &'a Cell<bool>) -> Self {
        Self { value, changed }
    }

    /// Read the current draft value.
    #[must_use]
    pub fn get(&self) -> &P {
        self.value
    }

    /// Mutable access to the draft. Marks the draft changed.
    pub fn get_mut(&mut self) -> &mut P {
        self.changed.set(true);
        self.value
    }

    /// Replace the partition wholesale. Marks the draft changed.
    pub fn replace(&mut self, next: P) {
        self.changed.set(true);
        *self.value = next;
    }
}

type ReadHandler<S> = Rc<dyn Fn(&S, &EventEnvelope, &EventContext<'_>) -> HandlerResult>;
type WriteHandler<S> =
    Rc<dyn Fn(&mut S, &Cell<bool>, &EventEnvelope, &EventContext<'_>) -> HandlerResult>;
type GroupPredicate<S> = Rc<dyn Fn(&S, &EventEnvelope, &EventContext<'_>) -> bool>;

enum Handler<S> {
    Read(ReadHandler<S>),
    Write(WriteHandler<S>),
}

/// Index of a binding group within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

struct Group<S> {
    partition: PartitionKey,
    predicate: Option<GroupPredicate<S>>,
}

/// State access handed to [`Binding::deliver`].
pub enum StateAccess<'a, S> {
    /// Pre-dispatch snapshot value; the preview stage.
    ReadOnly(&'a S),
    /// The open mutation session's working copy plus its changed flag.
    Draft {
        value: &'a mut S,
        changed: &'a Cell<bool>,
    },
}

/// One registered (event type, stage, group) → handler association.
pub struct Binding<S> {
    event_type: Rc<str>,
    stage: ObservationStage,
    group: GroupId,
    seq: u64,
    handler: Handler<S>,
}

impl<S> Binding<S> {
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn stage(&self) -> ObservationStage {
        self.stage
    }

    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Registration sequence number; delivery within a stage follows it.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Invoke the handler against `access`.
    pub fn deliver(
        &self,
        access: StateAccess<'_, S>,
        envelope: &EventEnvelope,
        ctx: &EventContext<'_>,
    ) -> HandlerResult {
        match (&self.handler, access) {
            (Handler::Read(handler), StateAccess::ReadOnly(state)) => {
                handler(state, envelope, ctx)
            }
            (Handler::Read(handler), StateAccess::Draft { value, .. }) => {
                handler(value, envelope, ctx)
            }
            (Handler::Write(handler), StateAccess::Draft { value, changed }) => {
                handler(value, changed, envelope, ctx)
            }
            (Handler::Write(_), StateAccess::ReadOnly(_)) => {
                // The builder only registers write handlers at mutation
                // stages, and the pipeline only passes ReadOnly at preview.
                unreachable!("write handler delivered read-only state")
            }
        }
    }
}

impl<S> fmt::Debug for Binding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("event_type", &self.event_type)
            .field("stage", &self.stage)
            .field("group", &self.group)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Ordered, immutable handler registration table for one model.
pub struct BindingTable<S> {
    groups: Vec<Group<S>>,
    bindings: Vec<Binding<S>>,
}

impl<S: 'static> BindingTable<S> {
    #[must_use]
    pub fn builder() -> BindingTableBuilder<S> {
        BindingTableBuilder::new()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn partition(&self, group: GroupId) -> &PartitionKey {
        &self.groups[group.0].partition
    }

    fn binding_matches(&self, binding: &Binding<S>, envelope: &EventEnvelope) -> bool {
        if binding.event_type.as_ref() != envelope.event_type() {
            return false;
        }
        match envelope.scope() {
            None => true,
            Some(scope) => scope == &self.groups[binding.group.0].partition,
        }
    }

    /// Groups with at least one binding matching `envelope`, in declaration
    /// order, without duplicates.
    #[must_use]
    pub fn groups_matching(&self, envelope: &EventEnvelope) -> Vec<GroupId> {
        let mut matched = vec![false; self.groups.len()];
        for binding in &self.bindings {
            if self.binding_matches(binding, envelope) {
                matched[binding.group.0] = true;
            }
        }
        matched
            .iter()
            .enumerate()
            .filter(|(_, hit)| **hit)
            .map(|(idx, _)| GroupId(idx))
            .collect()
    }

    /// Evaluate the group's delivery predicate (`true` when absent).
    #[must_use]
    pub fn group_admits(
        &self,
        group: GroupId,
        state: &S,
        envelope: &EventEnvelope,
        ctx: &EventContext<'_>,
    ) -> bool {
        match &self.groups[group.0].predicate {
            Some(predicate) => predicate(state, envelope, ctx),
            None => true,
        }
    }

    /// Bindings for `stage` matching `envelope`, in registration order.
    pub fn stage_bindings<'a>(
        &'a self,
        stage: ObservationStage,
        envelope: &'a EventEnvelope,
    ) -> impl Iterator<Item = &'a Binding<S>> {
        self.bindings
            .iter()
            .filter(move |binding| binding.stage == stage && self.binding_matches(binding, envelope))
    }
}

impl<S> fmt::Debug for BindingTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingTable")
            .field("groups", &self.groups.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Builds a [`BindingTable`]: declare groups, attach handlers per stage.
pub struct BindingTableBuilder<S> {
    groups: Vec<Group<S>>,
    bindings: Vec<Binding<S>>,
    next_seq: u64,
}

impl<S: 'static> BindingTableBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            bindings: Vec::new(),
            next_seq: 0,
        }
    }

    /// Open a whole-model binding group: handlers see the full state `S`.
    pub fn group(&mut self, partition: impl Into<PartitionKey>) -> GroupBuilder<'_, S, S> {
        self.scoped_group(partition, |state| state, |state| state)
    }

    /// Open a group scoped to one partition of the model via a lens pair.
    pub fn scoped_group<P: 'static>(
        &mut self,
        partition: impl Into<PartitionKey>,
        read: impl Fn(&S) -> &P + 'static,
        write: impl Fn(&mut S) -> &mut P + 'static,
    ) -> GroupBuilder<'_, S, P> {
        let group = GroupId(self.groups.len());
        self.groups.push(Group {
            partition: partition.into(),
            predicate: None,
        });
        GroupBuilder {
            builder: self,
            group,
            read: Rc::new(read),
            write: Rc::new(write),
        }
    }

    #[must_use]
    pub fn build(self) -> BindingTable<S> {
        BindingTable {
            groups: self.groups,
            bindings: self.bindings,
        }
    }
}

impl<S: 'static> Default for BindingTableBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers handlers for one binding group. Obtained from
/// [`BindingTableBuilder::group`] or
/// [`BindingTableBuilder::scoped_group`].
pub struct GroupBuilder<'t, S, P> {
    builder: &'t mut BindingTableBuilder<S>,
    group: GroupId,
    read: Rc<dyn Fn(&S) -> &P>,
    write: Rc<dyn Fn(&mut S) -> &mut P>,
}

impl<'t, S: 'static, P: 'static> GroupBuilder<'t, S, P> {
    /// Gate this group's deliveries per envelope. Evaluated once, before the
    /// preview stage, against the pre-dispatch snapshot; `false` excludes
    /// the group's bindings from every stage of that envelope.
    #[must_use]
    pub fn with_predicate(
        self,
        predicate: impl Fn(&S, &EventEnvelope, &EventContext<'_>) -> bool + 'static,
    ) -> Self {
        self.builder.groups[self.group.0].predicate = Some(Rc::new(predicate));
        self
    }

    /// Observe `event_type` at the preview stage (read-only).
    #[must_use]
    pub fn on_preview(
        self,
        event_type: &str,
        handler: impl Fn(&P, &EventEnvelope, &EventContext<'_>) -> HandlerResult + 'static,
    ) -> Self {
        let read = Rc::clone(&self.read);
        self.push(
            event_type,
            ObservationStage::Preview,
            Handler::Read(Rc::new(move |state, envelope, ctx| {
                handler(read(state), envelope, ctx)
            })),
        )
    }

    /// Observe `event_type` at the normal stage, against the draft.
    #[must_use]
    pub fn on_normal(
        self,
        event_type: &str,
        handler: impl Fn(&mut StateCell<'_, P>, &EventEnvelope, &EventContext<'_>) -> HandlerResult
        + 'static,
    ) -> Self {
        self.on_mutation(event_type, ObservationStage::Normal, handler)
    }

    /// Observe `event_type` at the committed stage, against the draft.
    #[must_use]
    pub fn on_committed(
        self,
        event_type: &str,
        handler: impl Fn(&mut StateCell<'_, P>, &EventEnvelope, &EventContext<'_>) -> HandlerResult
        + 'static,
    ) -> Self {
        self.on_mutation(event_type, ObservationStage::Committed, handler)
    }

    /// Observe `event_type` at the final stage, against the draft.
    #[must_use]
    pub fn on_final(
        self,
        event_type: &str,
        handler: impl Fn(&mut StateCell<'_, P>, &EventEnvelope, &EventContext<'_>) -> HandlerResult
        + 'static,
    ) -> Self {
        self.on_mutation(event_type, ObservationStage::Final, handler)
    }

    fn on_mutation(
        self,
        event_type: &str,
        stage: ObservationStage,
        handler: impl Fn(&mut StateCell<'_, P>, &EventEnvelope, &EventContext<'_>) -> HandlerResult
        + 'static,
    ) -> Self {
        let write = Rc::clone(&self.write);
        self.push(
            event_type,
            stage,
            Handler::Write(Rc::new(move |draft, changed, envelope, ctx| {
                let mut cell = StateCell::new(write(draft), changed);
                handler(&mut cell, envelope, ctx)
            })),
        )
    }

    fn push(self, event_type: &str, stage: ObservationStage, handler: Handler<S>) -> Self {
        let seq = self.builder.next_seq;
        self.builder.next_seq += 1;
        self.builder.bindings.push(Binding {
            event_type: Rc::from(event_type),
            stage,
            group: self.group,
            seq,
            handler,
        });
        self
    }
}
