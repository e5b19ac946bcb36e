#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_ecs::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn iteration_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");

    group.bench_function("iter_10k_two_components", |b| {
        let mut world = World::new();
        for i in 0..10_000 {
            world.spawn((Position(i as f32, 0.0, 0.0), Velocity(1.0, 0.0, 0.0)));
        }
        b.iter(|| {
            let mut sum = 0.0f32;
            for (pos, vel) in world.query::<(&Position, &Velocity)>().iter() {
                sum += pos.0 + vel.0;
            }
            black_box(sum);
        });
    });

    group.bench_function("iter_mut_10k", |b| {
        let mut world = World::new();
        for i in 0..10_000 {
            world.spawn((Position(i as f32, 0.0, 0.0), Velocity(1.0, 0.0, 0.0)));
        }
        b.iter(|| {
            for (pos, vel) in world.query_mut::<(&mut Position, &Velocity)>() {
                pos.0 += vel.0;
            }
        });
    });

    group.bench_function("iter_fragmented_archetypes", |b| {
        let mut world = World::new();
        for i in 0..10_000 {
            match i % 3 {
                0 => {
                    world.spawn((Position(0.0, 0.0, 0.0),));
                }
                1 => {
                    world.spawn((Position(0.0, 0.0, 0.0), Velocity(1.0, 0.0, 0.0)));
                }
                _ => {
                    world.spawn((Position(0.0, 0.0, 0.0), Health(100)));
                }
            }
        }
        b.iter(|| {
            black_box(world.query::<&Position>().count());
        });
    });

    group.finish();
}

fn transition_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("transitions");

    group.bench_function("add_remove_cached_edge", |b| {
        let mut world = World::new();
        let entity = world.spawn((Position(0.0, 0.0, 0.0),));
        // Warm the edge cache.
        world.add(entity, Velocity(0.0, 0.0, 0.0)).unwrap();
        world.remove::<Velocity>(entity).unwrap();

        b.iter(|| {
            world.add(entity, Velocity(1.0, 1.0, 1.0)).unwrap();
            world.remove::<Velocity>(entity).unwrap();
        });
    });

    group.finish();
}

fn schedule_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    group.sample_size(20);

    group.bench_function("frame_4_systems_10k_entities", |b| {
        let mut world = World::with_config(WorldConfig {
            worker_count: 4,
            ..WorldConfig::default()
        });
        for i in 0..10_000 {
            world.spawn((Position(i as f32, 0.0, 0.0), Velocity(1.0, 0.0, 0.0), Health(100)));
        }

        world
            .register_system(
                "integrate",
                Box::new(|world, _| {
                    for (pos, vel) in world.query_mut::<(&mut Position, &Velocity)>() {
                        pos.0 += vel.0;
                    }
                }),
                AccessDescriptor::new().write::<Position>().read::<Velocity>(),
                &[],
                &[],
            )
            .unwrap();
        world
            .register_system(
                "damp",
                Box::new(|world, _| {
                    for (vel,) in world.query_mut::<(&mut Velocity,)>() {
                        vel.0 *= 0.99;
                    }
                }),
                AccessDescriptor::new().write::<Velocity>(),
                &[],
                &[],
            )
            .unwrap();
        world
            .register_system(
                "regen",
                Box::new(|world, _| {
                    for (hp,) in world.query_mut::<(&mut Health,)>() {
                        hp.0 = hp.0.saturating_add(1);
                    }
                }),
                AccessDescriptor::new().write::<Health>(),
                &[],
                &[],
            )
            .unwrap();
        world
            .register_system(
                "observe-positions",
                Box::new(|world, _| {
                    let mut sum = 0.0f32;
                    for pos in world.query::<&Position>().iter() {
                        sum += pos.0;
                    }
                    black_box(sum);
                }),
                AccessDescriptor::new().read::<Position>(),
                &[],
                &[],
            )
            .unwrap();

        b.iter(|| world.update().unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    iteration_benchmark,
    transition_benchmark,
    schedule_benchmark
);
criterion_main!(benches);
