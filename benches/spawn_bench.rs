#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_ecs::World;

#[derive(Debug, Clone)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone)]
struct Health(u32);

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_bench");

    group.bench_function("spawn_2_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.spawn((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0))));
            }
        });
    });

    group.bench_function("spawn_3_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.spawn((
                    Position(1.0, 2.0, 3.0),
                    Velocity(1.0, 0.0, 0.0),
                    Health(100),
                )));
            }
        });
    });

    group.bench_function("spawn_batch_1000", |b| {
        let mut world = World::new();
        b.iter(|| {
            let entities = world.spawn_batch(
                (0..1000).map(|i| (Position(i as f32, 0.0, 0.0), Velocity(1.0, 0.0, 0.0))),
            );
            black_box(entities);
        });
    });

    group.bench_function("spawn_despawn_recycle", |b| {
        let mut world = World::new();
        b.iter(|| {
            let entity = world.spawn((Position(0.0, 0.0, 0.0),));
            world.despawn(black_box(entity)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
