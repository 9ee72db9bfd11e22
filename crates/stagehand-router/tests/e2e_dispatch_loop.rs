//! E2E: the model registry, queue drain loop, broadcast, disposal, hooks,
//! and snapshot streams.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use stagehand_core::{
    BindingTableBuilder, DispatchError, ModelId, ProcessorHook, Snapshot,
};
use stagehand_reactive::Observer;
use stagehand_router::Router;

#[derive(Debug, Clone, PartialEq)]
struct Counter {
    count: u32,
}

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn counter_bindings() -> stagehand_core::BindingTable<Counter> {
    let mut builder = BindingTableBuilder::<Counter>::new();
    builder.group("counter").on_normal("increment", |state, _, _| {
        state.get_mut().count += 1;
        Ok(())
    });
    builder.build()
}

// ── Queue drain & ordering ──────────────────────────────────────────────

#[test]
fn three_increments_produce_three_ordered_broadcasts() {
    let router = Router::new();
    let handle = router
        .register("m1", Counter { count: 0 }, counter_bindings())
        .unwrap();

    let counts = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&counts);
    let _sub = handle
        .snapshots()
        .subscribe(move |snapshot: &Rc<Snapshot<Counter>>| {
            sink.borrow_mut().push(snapshot.read().count);
        });

    for _ in 0..3 {
        handle.publish("increment", ()).unwrap();
    }

    assert_eq!(handle.current().read().count, 3);
    assert_eq!(handle.current().version(), 3);
    // Replay of the initial snapshot, then one broadcast per commit.
    assert_eq!(*counts.borrow(), vec![0, 1, 2, 3]);
}

#[test]
fn nested_publish_runs_after_the_inflight_envelope_finishes() {
    let log = new_log();
    let router = Router::new();
    let id = ModelId::from("m1");

    let mut builder = BindingTableBuilder::<Counter>::new();
    let nested_router = router.clone();
    let nested_id = id.clone();
    let (n, f, sn, sf) = (
        Rc::clone(&log),
        Rc::clone(&log),
        Rc::clone(&log),
        Rc::clone(&log),
    );
    builder
        .group("counter")
        .on_normal("first", move |state, _, _| {
            state.get_mut().count += 1;
            n.borrow_mut().push("first:normal".into());
            nested_router.publish(&nested_id, "second", ())?;
            Ok(())
        })
        .on_final("first", move |_, _, _| {
            f.borrow_mut().push("first:final".into());
            Ok(())
        })
        .on_normal("second", move |state, _, _| {
            state.get_mut().count += 10;
            sn.borrow_mut().push("second:normal".into());
            Ok(())
        })
        .on_final("second", move |_, _, _| {
            sf.borrow_mut().push("second:final".into());
            Ok(())
        });

    let handle = router
        .register(id.clone(), Counter { count: 0 }, builder.build())
        .unwrap();

    handle.publish("first", ()).unwrap();

    // The nested event's whole pipeline runs only after the in-flight
    // envelope reaches its final stage; both are drained before the
    // outermost publish returns.
    assert_eq!(
        *log.borrow(),
        vec![
            "first:normal",
            "first:final",
            "second:normal",
            "second:final",
        ]
    );
    assert_eq!(handle.current().read().count, 11);
}

#[test]
fn events_enqueued_by_a_handler_drain_in_order_before_publish_returns() {
    let log = new_log();
    let router = Router::new();
    let id = ModelId::from("m1");

    let mut builder = BindingTableBuilder::<Counter>::new();
    let seed_router = router.clone();
    let seed_id = id.clone();
    let seen = Rc::clone(&log);
    builder
        .group("counter")
        .on_normal("seed", move |_, _, _| {
            seed_router.publish(&seed_id, "tick", 1u32)?;
            seed_router.publish(&seed_id, "tick", 2u32)?;
            seed_router.publish(&seed_id, "tick", 3u32)?;
            Ok(())
        })
        .on_normal("tick", move |state, env, _| {
            state.get_mut().count += 1;
            let n = env.payload::<u32>().copied().unwrap_or_default();
            seen.borrow_mut().push(format!("tick:{n}"));
            Ok(())
        });

    let handle = router
        .register(id, Counter { count: 0 }, builder.build())
        .unwrap();
    handle.publish("seed", ()).unwrap();

    assert_eq!(*log.borrow(), vec!["tick:1", "tick:2", "tick:3"]);
    assert_eq!(handle.current().read().count, 3);
}

// ── Registration & disposal ─────────────────────────────────────────────

#[test]
fn duplicate_identity_is_rejected() {
    let router = Router::new();
    router
        .register("m1", Counter { count: 0 }, counter_bindings())
        .unwrap();
    let err = router
        .register("m1", Counter { count: 0 }, counter_bindings())
        .unwrap_err();
    assert!(matches!(err, DispatchError::DuplicateIdentity(_)));
}

#[test]
fn publish_to_unknown_model_fails() {
    let router = Router::new();
    let err = router
        .publish(&ModelId::from("ghost"), "evt", ())
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownModel(_)));
}

#[test]
fn snapshot_stream_with_wrong_state_type_behaves_as_unknown() {
    let router = Router::new();
    let id = ModelId::from("m1");
    router
        .register(id.clone(), Counter { count: 0 }, counter_bindings())
        .unwrap();
    let err = router.snapshot_stream::<String>(&id).unwrap_err();
    assert!(matches!(err, DispatchError::UnknownModel(_)));
    assert!(router.snapshot_stream::<Counter>(&id).is_ok());
}

struct CompletionProbe {
    completed: Rc<RefCell<bool>>,
}

impl Observer<Rc<Snapshot<Counter>>> for CompletionProbe {
    fn on_next(&self, _: &Rc<Snapshot<Counter>>) {}

    fn on_completed(&self) {
        *self.completed.borrow_mut() = true;
    }
}

#[test]
fn dispose_unregisters_completes_stream_and_rejects_publishes() {
    let router = Router::new();
    let handle = router
        .register("m1", Counter { count: 0 }, counter_bindings())
        .unwrap();

    let completed = Rc::new(RefCell::new(false));
    let _sub = handle.snapshots().subscribe_observer(Rc::new(CompletionProbe {
        completed: Rc::clone(&completed),
    }));

    handle.dispose().unwrap();
    assert!(*completed.borrow());
    assert!(!router.is_registered(handle.id()));

    let err = handle.publish("increment", ()).unwrap_err();
    assert!(matches!(err, DispatchError::UnknownModel(_)));
}

#[test]
fn dispose_from_a_handler_discards_queued_events() {
    let router = Router::new();
    let id = ModelId::from("m1");

    let mut builder = BindingTableBuilder::<Counter>::new();
    let inner_router = router.clone();
    let inner_id = id.clone();
    builder
        .group("counter")
        .on_normal("self-destruct", move |state, _, _| {
            state.get_mut().count += 1;
            // Enqueue work that must never run, then dispose.
            inner_router.publish(&inner_id, "increment", ())?;
            inner_router.dispose(&inner_id)?;
            Ok(())
        })
        .on_normal("increment", |state, _, _| {
            state.get_mut().count += 100;
            Ok(())
        })
        .on_final("self-destruct", |state, _, _| {
            // The in-flight envelope still finishes all its stages.
            assert_eq!(state.get().count, 1);
            Ok(())
        });

    let handle = router
        .register(id.clone(), Counter { count: 0 }, builder.build())
        .unwrap();
    handle.publish("self-destruct", ()).unwrap();

    assert_eq!(handle.current().read().count, 1);
    assert!(matches!(
        router.publish(&id, "increment", ()),
        Err(DispatchError::UnknownModel(_))
    ));
}

// ── Broadcast ───────────────────────────────────────────────────────────

#[test]
fn broadcast_reaches_models_in_registration_order() {
    let log = new_log();
    let router = Router::new();

    for name in ["first", "second", "third"] {
        let mut builder = BindingTableBuilder::<Counter>::new();
        let sink = Rc::clone(&log);
        builder.group("counter").on_normal("ping", move |_, env, _| {
            sink.borrow_mut().push(env.model_id().to_string());
            Ok(())
        });
        router
            .register(name, Counter { count: 0 }, builder.build())
            .unwrap();
    }

    router.broadcast("ping", ()).unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);

    log.borrow_mut().clear();
    router.dispose(&ModelId::from("second")).unwrap();
    router.broadcast("ping", ()).unwrap();
    assert_eq!(*log.borrow(), vec!["first", "third"]);
}

// ── Hooks ───────────────────────────────────────────────────────────────

#[test]
fn pre_processor_error_aborts_before_any_stage() {
    let log = new_log();
    let mut builder = BindingTableBuilder::<Counter>::new();
    let sink = Rc::clone(&log);
    builder.group("counter").on_preview("evt", move |_, _, _| {
        sink.borrow_mut().push("preview".into());
        Ok(())
    });

    let router = Router::new();
    let handle = router
        .model("m1", Counter { count: 0 })
        .bindings(builder.build())
        .on_before_dispatch(|_, _| Err("gate closed".into()))
        .register()
        .unwrap();

    let err = handle.publish("evt", ()).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::ProcessorFailed {
            hook: ProcessorHook::Pre,
            ..
        }
    ));
    assert!(log.borrow().is_empty());
    assert_eq!(handle.current().version(), 0);
}

#[test]
fn post_processor_runs_after_commit_and_broadcast() {
    let log = new_log();
    let router = Router::new();

    let post_log = Rc::clone(&log);
    let handle = router
        .model("m1", Counter { count: 0 })
        .bindings(counter_bindings())
        .on_after_dispatch(move |_, state| {
            post_log.borrow_mut().push(format!("post:{}", state.count));
            Ok(())
        })
        .register()
        .unwrap();

    let stream_log = Rc::clone(&log);
    let _sub = handle
        .snapshots()
        .subscribe(move |snapshot: &Rc<Snapshot<Counter>>| {
            stream_log
                .borrow_mut()
                .push(format!("broadcast:{}", snapshot.read().count));
        });

    handle.publish("increment", ()).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["broadcast:0", "broadcast:1", "post:1"]
    );
}

#[test]
fn post_processor_error_propagates_without_undoing_the_commit() {
    let router = Router::new();
    let handle = router
        .model("m1", Counter { count: 0 })
        .bindings(counter_bindings())
        .on_after_dispatch(|_, _| Err("audit sink unavailable".into()))
        .register()
        .unwrap();

    let err = handle.publish("increment", ()).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::ProcessorFailed {
            hook: ProcessorHook::Post,
            ..
        }
    ));
    assert_eq!(handle.current().read().count, 1);
}

#[test]
fn commit_inspector_sees_previous_and_next_values() {
    let log = new_log();
    let router = Router::new();

    let sink = Rc::clone(&log);
    let handle = router
        .model("m1", Counter { count: 0 })
        .bindings(counter_bindings())
        .on_commit(move |prev, next, envelope| {
            sink.borrow_mut().push(format!(
                "{}:{}->{}",
                envelope.event_type(),
                prev.count,
                next.count
            ));
        })
        .register()
        .unwrap();

    handle.publish("increment", ()).unwrap();
    handle.publish("increment", ()).unwrap();
    assert_eq!(*log.borrow(), vec!["increment:0->1", "increment:1->2"]);
}

// ── Expiry ──────────────────────────────────────────────────────────────

#[test]
fn committed_dispatch_expires_the_prior_snapshot() {
    let router = Router::new();
    let handle = router
        .register("m1", Counter { count: 0 }, counter_bindings())
        .unwrap();

    let initial = handle.current();
    assert!(!initial.is_expired());

    handle.publish("increment", ()).unwrap();
    assert!(initial.is_expired());
    assert!(!handle.current().is_expired());
    assert_eq!(handle.current().version(), initial.version() + 1);
}
