//! Dispatch throughput: one hot model, and a fleet of models with wide
//! binding tables.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use stagehand_core::{BindingTable, BindingTableBuilder};
use stagehand_router::{ModelHandle, Router};

#[derive(Debug, Clone)]
struct Counter {
    count: u64,
}

fn wide_bindings(event_types: usize) -> BindingTable<Counter> {
    let mut builder = BindingTableBuilder::<Counter>::new();
    let mut group = builder.group("counter");
    for i in 0..event_types {
        group = group.on_normal(&format!("evt{i}"), |state, _, _| {
            state.get_mut().count += 1;
            Ok(())
        });
    }
    drop(group);
    builder.build()
}

fn single_model(c: &mut Criterion) {
    let router = Router::new();
    let handle = router
        .register("hot", Counter { count: 0 }, wide_bindings(1))
        .unwrap();

    c.bench_function("publish_1k_events_single_model", |b| {
        b.iter(|| {
            for _ in 0..1_000 {
                handle.publish(black_box("evt0"), ()).unwrap();
            }
        });
    });
}

fn model_fleet(c: &mut Criterion) {
    let router = Router::new();
    let handles: Vec<ModelHandle<Counter>> = (0..50)
        .map(|i| {
            router
                .register(format!("model{i}"), Counter { count: 0 }, wide_bindings(100))
                .unwrap()
        })
        .collect();

    c.bench_function("publish_20_events_across_50_models", |b| {
        b.iter(|| {
            for handle in &handles {
                for i in 0..20 {
                    handle.publish(black_box(&format!("evt{i}")), ()).unwrap();
                }
            }
        });
    });
}

criterion_group!(benches, single_model, model_fleet);
criterion_main!(benches);
