//! Cross-module invariants: identity, storage layout, tick monotonicity.

use strata_ecs::prelude::*;
use strata_ecs::TypeId;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hp(u32);

#[test]
fn alive_exactly_between_spawn_and_despawn() {
    let mut world = World::new();
    let entities: Vec<Entity> = (0..32).map(|i| world.spawn((Hp(i),))).collect();
    assert!(entities.iter().all(|&e| world.is_alive(e)));

    for &e in &entities[..16] {
        world.despawn(e).unwrap();
    }
    assert!(entities[..16].iter().all(|&e| !world.is_alive(e)));
    assert!(entities[16..].iter().all(|&e| world.is_alive(e)));
}

#[test]
fn same_index_different_generation_never_both_live() {
    let mut world = World::new();
    let old = world.spawn((Hp(1),));
    world.despawn(old).unwrap();
    let new = world.spawn((Hp(2),));

    assert_eq!(old.index(), new.index());
    assert_ne!(old, new);
    assert!(!world.is_alive(old));
    assert!(world.is_alive(new));
    // The stale handle cannot reach the new entity's data.
    assert_eq!(world.get::<Hp>(old), None);
}

#[test]
fn spawn_despawn_loop_keeps_high_water_mark_flat() {
    let mut world = World::new();
    let mut entity = world.spawn((Hp(0),));
    for i in 1..500 {
        world.despawn(entity).unwrap();
        entity = world.spawn((Hp(i),));
    }
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.entity_high_water_mark(), 1);
}

#[test]
fn add_then_get_is_byte_equal() {
    let mut world = World::new();
    let entity = world.spawn_empty();
    let value = Pos(1.25, -3.5);
    world.add(entity, value).unwrap();
    assert_eq!(world.get::<Pos>(entity), Some(&value));
}

#[test]
fn add_remove_add_lands_in_the_same_archetypes() {
    let mut world = World::new();
    let entity = world.spawn((Pos(0.0, 0.0),));

    world.add(entity, Vel(1.0, 1.0)).unwrap();
    let first_pair = world.location(entity).unwrap().archetype;

    world.remove::<Vel>(entity).unwrap();
    let back = world.location(entity).unwrap().archetype;

    world.add(entity, Vel(2.0, 2.0)).unwrap();
    let second_pair = world.location(entity).unwrap().archetype;

    assert_eq!(first_pair, second_pair);

    // Direct spawn of the same type set reuses the bucket too.
    let direct = world.spawn((Pos(9.0, 9.0), Vel(9.0, 9.0)));
    assert_eq!(world.location(direct).unwrap().archetype, first_pair);

    // And the singleton bucket is stable as well.
    let lone = world.spawn((Pos(5.0, 5.0),));
    assert_eq!(world.location(lone).unwrap().archetype, back);
}

#[test]
fn row_counts_agree_across_columns_and_locations_resolve() {
    let mut world = World::new();
    let mut entities = Vec::new();
    for i in 0..20 {
        entities.push(world.spawn((Pos(i as f32, 0.0), Vel(0.0, i as f32))));
    }
    for e in entities.iter().step_by(3) {
        world.despawn(*e).unwrap();
    }

    for archetype in world.archetypes() {
        let rows = archetype.row_count();
        for column in archetype.table().columns() {
            assert_eq!(column.len(), rows);
        }
        for (row, &entity) in archetype.table().entities().iter().enumerate() {
            let location = world.location(entity).unwrap();
            assert_eq!(location.row as usize, row);
            assert_eq!(world.archetype(location.archetype).id(), archetype.id());
        }
    }
}

#[test]
fn ticks_never_exceed_current_tick() {
    let mut world = World::new();
    let mut entities = Vec::new();
    for i in 0..8 {
        entities.push(world.spawn((Hp(i),)));
    }
    world.update().unwrap();
    world.set(entities[2], Hp(99)).unwrap();
    world.update().unwrap();
    world.add(entities[5], Pos(1.0, 1.0)).unwrap();
    world.update().unwrap();

    let now = world.tick();
    for archetype in world.archetypes() {
        for column in archetype.table().columns() {
            for row in 0..column.len() {
                let ticks = column.ticks(row);
                assert!(!ticks.added.is_newer_than(now));
                assert!(!ticks.changed.is_newer_than(now));
            }
        }
    }
}

#[test]
fn update_advances_tick_by_exactly_one() {
    let mut world = World::new();
    for _ in 0..5 {
        let before = world.tick().get();
        world.update().unwrap();
        assert_eq!(world.tick().get(), before.wrapping_add(1));
    }
}

#[test]
fn mutable_query_write_stamps_current_tick() {
    let mut world = World::new();
    world.spawn((Pos(0.0, 0.0), Vel(1.0, 0.0)));
    world.update().unwrap();

    let now = world.tick();
    for (pos, vel) in world.query_mut::<(&mut Pos, &Vel)>() {
        pos.0 += vel.0;
    }

    let handle = world.location(world.query::<EntityRef>().iter().next().unwrap()).unwrap();
    let column = world
        .archetype(handle.archetype)
        .table()
        .column(TypeId::of::<Pos>())
        .unwrap();
    assert_eq!(column.ticks(handle.row as usize).changed, now);

    // The read-only column was not touched.
    let vel_column = world
        .archetype(handle.archetype)
        .table()
        .column(TypeId::of::<Vel>())
        .unwrap();
    assert!(!vel_column.ticks(handle.row as usize).changed.is_newer_than(Tick(1)));
}

#[test]
fn diff_with_default_roundtrip_is_zero() {
    use strata_ecs::reflect::TypeRegistry;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Stats {
        strength: u32,
        agility: u32,
        stamina: f32,
    }
    strata_ecs::reflect_struct!(Stats { strength: u32, agility: u32, stamina: f32 });

    let mut registry = TypeRegistry::new();
    registry.register::<Stats>().unwrap();

    assert_eq!(registry.diff(&Stats::default()), Some(0));
    let changed = Stats {
        strength: 1,
        ..Stats::default()
    };
    assert_eq!(registry.diff(&changed), Some(0b001));
}
