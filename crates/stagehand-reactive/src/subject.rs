#![forbid(unsafe_code)]

//! Ordered multicast subject.
//!
//! # Design
//!
//! [`Subject<T>`] fans one value out to every subscribed observer, in
//! subscription order. Because observer callbacks may themselves subscribe,
//! unsubscribe, or emit on the same subject, the observer list is *gated*: a
//! `working` flag marks an in-progress iteration, and any structural change
//! requested while it is set is parked in pending queues that are applied
//! once the outermost iteration finishes. Copying the observer list per
//! emission would give the same stability guarantee, but is not acceptable
//! for subjects with large observer counts on hot paths.
//!
//! Nested emissions do not defer: they iterate the live list immediately,
//! which matches the outer iteration's view since the list cannot change
//! structurally while any iteration is active.
//!
//! # Failure Modes
//!
//! - **Observer panics**: pending structural changes are not applied and the
//!   `working` flag stays set; the subject must be considered poisoned. The
//!   runtime never panics inside observer callbacks it installs itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::subscription::Subscription;

/// Receiving side of a [`Subject`].
///
/// Blanket-implemented for closures, so `subject.subscribe(|v| ..)` is the
/// common form; implement the trait directly when the completion signal
/// matters.
pub trait Observer<T> {
    /// Called once per emitted value.
    fn on_next(&self, value: &T);

    /// Called once when the subject completes. Defaults to a no-op.
    fn on_completed(&self) {}
}

impl<T, F: Fn(&T)> Observer<T> for F {
    fn on_next(&self, value: &T) {
        self(value);
    }
}

type ObserverId = u64;

struct Entry<T> {
    id: ObserverId,
    observer: Rc<dyn Observer<T>>,
}

struct SubjectInner<T> {
    observers: Vec<Entry<T>>,
    pending_adds: Vec<Entry<T>>,
    pending_removes: Vec<ObserverId>,
    working: bool,
    completed: bool,
    replay_last: bool,
    last_value: Option<T>,
    next_id: ObserverId,
}

/// An ordered multicast channel.
///
/// Cloning a `Subject` creates a new handle to the **same** channel.
pub struct Subject<T> {
    inner: Rc<RefCell<SubjectInner<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Subject<T> {
    /// Create a subject that does not replay past values to new observers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_replay(false)
    }

    /// Create a subject that caches the last emitted value and delivers it
    /// synchronously to each new observer before `subscribe` returns.
    #[must_use]
    pub fn replaying() -> Self {
        Self::with_replay(true)
    }

    fn with_replay(replay_last: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SubjectInner {
                observers: Vec::new(),
                pending_adds: Vec::new(),
                pending_removes: Vec::new(),
                working: false,
                completed: false,
                replay_last,
                last_value: None,
                next_id: 0,
            })),
        }
    }

    /// Subscribe a closure observer.
    #[must_use = "dropping the subscription unsubscribes the observer"]
    pub fn subscribe(&self, on_next: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_observer(Rc::new(on_next))
    }

    /// Subscribe an observer, appending it to the ordered observer list.
    ///
    /// On a replaying subject with a cached value, the observer receives that
    /// value synchronously before this returns (even after completion).
    #[must_use = "dropping the subscription unsubscribes the observer"]
    pub fn subscribe_observer(&self, observer: Rc<dyn Observer<T>>) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let entry = Entry {
                id,
                observer: Rc::clone(&observer),
            };
            if inner.working {
                inner.pending_adds.push(entry);
            } else {
                inner.observers.push(entry);
            }
            id
        };

        let replay = {
            let inner = self.inner.borrow();
            if inner.replay_last {
                inner.last_value.clone()
            } else {
                None
            }
        };
        if let Some(value) = replay {
            observer.on_next(&value);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::remove(&inner, id);
            }
        })
    }

    /// Deliver `value` to every current observer in subscription order.
    ///
    /// No-op after [`complete`](Self::complete).
    pub fn emit(&self, value: T) {
        let nested = {
            let mut inner = self.inner.borrow_mut();
            if inner.completed {
                return;
            }
            if inner.replay_last {
                inner.last_value = Some(value.clone());
            }
            std::mem::replace(&mut inner.working, true)
        };

        let mut idx = 0;
        loop {
            let observer = {
                let inner = self.inner.borrow();
                match inner.observers.get(idx) {
                    Some(entry) => Rc::clone(&entry.observer),
                    None => break,
                }
            };
            observer.on_next(&value);
            idx += 1;
        }

        if !nested {
            self.apply_pending();
        }
    }

    /// Deliver the one-time completion signal to every observer. Idempotent;
    /// subsequent `emit` calls are no-ops.
    pub fn complete(&self) {
        let nested = {
            let mut inner = self.inner.borrow_mut();
            if inner.completed {
                return;
            }
            inner.completed = true;
            std::mem::replace(&mut inner.working, true)
        };

        let mut idx = 0;
        loop {
            let observer = {
                let inner = self.inner.borrow();
                match inner.observers.get(idx) {
                    Some(entry) => Rc::clone(&entry.observer),
                    None => break,
                }
            };
            observer.on_completed();
            idx += 1;
        }

        if !nested {
            self.apply_pending();
        }
    }

    /// Whether [`complete`](Self::complete) has been called.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.borrow().completed
    }

    /// Number of live observers (excluding structural changes still pending
    /// behind an active emission).
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    fn apply_pending(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.working = false;
        let adds = std::mem::take(&mut inner.pending_adds);
        inner.observers.extend(adds);
        let removes = std::mem::take(&mut inner.pending_removes);
        if !removes.is_empty() {
            inner.observers.retain(|entry| !removes.contains(&entry.id));
        }
    }

    fn remove(inner: &Rc<RefCell<SubjectInner<T>>>, id: ObserverId) {
        let mut inner = inner.borrow_mut();
        if inner.working {
            // An unsubscribe racing a subscribe from the same emission must
            // cancel the pending add rather than queue a remove for an entry
            // that is not live yet.
            if let Some(pos) = inner.pending_adds.iter().position(|entry| entry.id == id) {
                inner.pending_adds.remove(pos);
            } else {
                inner.pending_removes.push(id);
            }
        } else if let Some(pos) = inner.observers.iter().position(|entry| entry.id == id) {
            inner.observers.remove(pos);
        }
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Subject")
            .field("observers", &inner.observers.len())
            .field("completed", &inner.completed)
            .field("replay_last", &inner.replay_last)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
