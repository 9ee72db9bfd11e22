//! Property tests for [`Subject`] observer bookkeeping.
//!
//! Invariants checked:
//! 1. Every observer receives exactly the values emitted while it was
//!    subscribed, in emission order.
//! 2. Replaying subjects hand each new observer the most recent value first.
//! 3. Completion freezes the stream: no observer sees values emitted after it.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use proptest::prelude::*;
use stagehand_reactive::{Subject, Subscription};

#[derive(Debug, Clone)]
enum Op {
    Emit(u32),
    Subscribe,
    /// Unsubscribe the nth live observer (modulo the live count).
    Unsubscribe(usize),
    Complete,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Emit),
        2 => Just(Op::Subscribe),
        2 => (0usize..8).prop_map(Op::Unsubscribe),
        1 => Just(Op::Complete),
    ]
}

/// Reference model: which values each observer should have seen.
struct Harness {
    subject: Subject<u32>,
    subs: Vec<(usize, Subscription)>,
    seen: Rc<RefCell<BTreeMap<usize, Vec<u32>>>>,
    expected: BTreeMap<usize, Vec<u32>>,
    next_observer: usize,
    completed: bool,
}

impl Harness {
    fn new(replaying: bool) -> Self {
        Self {
            subject: if replaying {
                Subject::replaying()
            } else {
                Subject::new()
            },
            subs: Vec::new(),
            seen: Rc::new(RefCell::new(BTreeMap::new())),
            expected: BTreeMap::new(),
            next_observer: 0,
            completed: false,
        }
    }

    fn apply(&mut self, op: &Op, replaying: bool, last_value: &mut Option<u32>) {
        match op {
            Op::Emit(v) => {
                self.subject.emit(*v);
                if !self.completed {
                    *last_value = Some(*v);
                    for (id, _) in &self.subs {
                        self.expected.entry(*id).or_default().push(*v);
                    }
                }
            }
            Op::Subscribe => {
                let id = self.next_observer;
                self.next_observer += 1;
                let sink = Rc::clone(&self.seen);
                let sub = self
                    .subject
                    .subscribe(move |v: &u32| sink.borrow_mut().entry(id).or_default().push(*v));
                self.subs.push((id, sub));
                if replaying {
                    if let Some(v) = *last_value {
                        self.expected.entry(id).or_default().push(v);
                    }
                }
            }
            Op::Unsubscribe(n) => {
                if !self.subs.is_empty() {
                    let idx = n % self.subs.len();
                    self.subs.remove(idx);
                }
            }
            Op::Complete => {
                self.subject.complete();
                self.completed = true;
            }
        }
    }
}

proptest! {
    #[test]
    fn observers_see_exactly_their_subscription_window(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let mut harness = Harness::new(false);
        let mut last_value = None;
        for op in &ops {
            harness.apply(op, false, &mut last_value);
        }
        prop_assert_eq!(&*harness.seen.borrow(), &harness.expected);
    }

    #[test]
    fn replaying_subject_prepends_cached_value(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let mut harness = Harness::new(true);
        let mut last_value = None;
        for op in &ops {
            harness.apply(op, true, &mut last_value);
        }
        prop_assert_eq!(&*harness.seen.borrow(), &harness.expected);
    }
}
