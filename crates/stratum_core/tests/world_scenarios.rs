use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use stratum_core::ecs::{Archetype, Entity, Slot};
use stratum_core::{QueryDescription, World, WorldConfig, WorldError};

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Health(u32);

#[derive(Clone, Default, Debug, PartialEq)]
struct Label(String);

fn small_chunks() -> WorldConfig {
    WorldConfig {
        chunk_size_bytes: 1024,
        ..WorldConfig::default()
    }
}

/// Deterministic pseudo-random sequence (Knuth MMIX LCG).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Every occupied row resolves back to itself through the entity map, and
/// no row appears twice.
fn assert_slots_consistent(world: &World) {
    let mut seen = HashSet::new();
    for archetype in world.archetypes() {
        let mut rows = 0;
        for (chunk_index, chunk) in archetype.chunks().iter().enumerate() {
            assert!(!chunk.is_empty(), "occupied prefix holds an empty chunk");
            for (row, &entity) in chunk.entities().iter().enumerate() {
                let info = world.entity_info(entity).expect("row holds a dead entity");
                assert_eq!(info.archetype, archetype.id());
                assert_eq!(info.slot, Slot::new(chunk_index, row));
                assert!(seen.insert(entity), "{entity:?} occupies two rows");
                rows += 1;
            }
        }
        assert_eq!(rows, archetype.entity_count());
    }
}

fn assert_capacity_coupled(world: &World) {
    let total: usize = world.archetypes().iter().map(Archetype::capacity).sum();
    assert_eq!(world.capacity(), total);
    assert!(world.entity_info_capacity() >= world.capacity());
}

#[test]
fn test_concrete_scenario() {
    let mut world = World::new();
    let e1 = world.create((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 1.0 }));
    let e2 = world.create((Position { x: 5.0, y: 5.0 }, Velocity { x: 0.0, y: 0.0 }));

    {
        let (p, v) = world.get::<(Position, Velocity)>(e1).unwrap();
        assert_eq!((*p, *v), (Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 1.0 }));
    }

    world.set(e2, (Position { x: 9.0, y: 9.0 },)).unwrap();
    assert_eq!(
        *world.get_component::<Position>(e2).unwrap(),
        Position { x: 9.0, y: 9.0 }
    );
    assert_eq!(
        *world.get_component::<Velocity>(e2).unwrap(),
        Velocity { x: 0.0, y: 0.0 }
    );

    world.destroy(e1).unwrap();
    assert!(matches!(
        world.get::<(Position, Velocity)>(e1),
        Err(WorldError::EntityNotAlive(_))
    ));

    let (p, v) = world.get::<(Position, Velocity)>(e2).unwrap();
    assert_eq!(*p, Position { x: 9.0, y: 9.0 });
    assert_eq!(*v, Velocity { x: 0.0, y: 0.0 });
    assert_eq!(world.entity_info(e2).unwrap().slot, Slot::new(0, 0));
}

#[test]
fn test_round_trip_and_default_overwrite() {
    let mut world = World::new();
    let e = world.create((Health(3), Label("crate".into())));
    assert_eq!(*world.get_component::<Health>(e).unwrap(), Health(3));

    world.set(e, (Health(7), Label("barrel".into()))).unwrap();
    {
        let (h, l) = world.get::<(Health, Label)>(e).unwrap();
        assert_eq!((*h, l.0.as_str()), (Health(7), "barrel"));
    }

    world
        .set_partial::<(Health, Label)>(e, (Some(Health(8)), None))
        .unwrap();
    assert_eq!(*world.get_component::<Label>(e).unwrap(), Label::default());
    assert_eq!(*world.get_component::<Health>(e).unwrap(), Health(8));
}

#[test]
fn test_slot_invariant_after_middle_removal() {
    let mut world = World::with_config(small_chunks());
    let entities: Vec<Entity> = (0..100)
        .map(|i| world.create((Health(i),)))
        .collect();

    let last = *entities.last().unwrap();
    let middle = entities[40];
    let old_slot = world.entity_info(middle).unwrap().slot;

    world.destroy(middle).unwrap();
    assert_eq!(world.entity_info(last).unwrap().slot, old_slot);
    assert_eq!(*world.get_component::<Health>(last).unwrap(), Health(99));
    assert_slots_consistent(&world);
}

#[test]
fn test_bulk_create_matches_single_creates() {
    const N: usize = 250;
    let values = (Position { x: 1.0, y: 2.0 }, Velocity { x: 3.0, y: 4.0 });

    let mut bulk = World::with_config(small_chunks());
    let mut created = Vec::new();
    bulk.create_many_into(N, values, &mut created);

    let mut single = World::with_config(small_chunks());
    for _ in 0..N {
        single.create(values);
    }

    let unique: HashSet<Entity> = created.iter().copied().collect();
    assert_eq!(unique.len(), N);
    assert!(created.iter().all(|&e| bulk.is_alive(e)));

    let description = QueryDescription::new().with_all::<(Position, Velocity)>();
    for world in [&mut bulk, &mut single] {
        let mut rows = Vec::new();
        world.query::<(Position, Velocity), _>(
            &description,
            |_e: Entity, (p, v): (&mut Position, &mut Velocity)| rows.push((*p, *v)),
        );
        assert_eq!(rows.len(), N);
        assert!(rows.iter().all(|row| *row == values));
    }

    assert_eq!(bulk.capacity(), single.capacity());
    assert_slots_consistent(&bulk);
    assert_capacity_coupled(&bulk);
}

#[test]
fn test_capacity_coupling_across_creates() {
    let mut world = World::with_config(small_chunks());
    let mut rng = Lcg(7);

    for round in 0..40 {
        match rng.below(3) {
            0 => {
                world.create((Position::default(),));
            }
            1 => world.create_many(rng.below(120), (Position::default(), Health(round))),
            _ => world.create_many(rng.below(60) + 1, (Velocity::default(),)),
        }
        assert_capacity_coupled(&world);
    }

    assert!(world.capacity() >= world.entity_count());
    assert_slots_consistent(&world);
}

#[test]
fn test_slot_invariant_under_churn() {
    let mut world = World::with_config(small_chunks());
    let mut rng = Lcg(0x5eed);
    let mut alive: Vec<Entity> = Vec::new();

    for step in 0..2_000u32 {
        match rng.below(6) {
            0 | 1 => alive.push(world.create((Health(step), Position::default()))),
            2 => {
                let mut batch = Vec::new();
                world.create_many_into(rng.below(40), (Health(step),), &mut batch);
                alive.extend(batch);
            }
            3 if !alive.is_empty() => {
                let victim = alive.swap_remove(rng.below(alive.len()));
                world.destroy(victim).unwrap();
                assert!(!world.is_alive(victim));
            }
            4 if !alive.is_empty() => {
                let target = alive[rng.below(alive.len())];
                if world.has::<(Velocity,)>(target) {
                    world.remove_component::<Velocity>(target).unwrap();
                } else {
                    world.add_component(target, Velocity { x: 1.0, y: 0.0 }).unwrap();
                }
            }
            _ => {
                if rng.below(10) == 0 {
                    world.trim_excess();
                }
            }
        }

        if step % 100 == 0 {
            assert_slots_consistent(&world);
            assert_capacity_coupled(&world);
        }
    }

    assert_eq!(world.entity_count(), alive.len());
    assert_slots_consistent(&world);
    assert_capacity_coupled(&world);
    for &entity in &alive {
        assert!(world.get_component::<Health>(entity).is_ok());
    }
}

/// Panics from `Default`, so it only works when a value is supplied.
#[derive(Clone, Debug, PartialEq)]
struct NoDefault(u32);

impl Default for NoDefault {
    fn default() -> Self {
        panic!("NoDefault has no default value")
    }
}

/// Panics when dropped while armed.
#[derive(Clone, Default)]
struct Brittle(bool);

impl Drop for Brittle {
    fn drop(&mut self) {
        if std::mem::take(&mut self.0) {
            panic!("brittle component dropped");
        }
    }
}

#[test]
fn test_add_component_writes_value_without_default() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone, Default)]
    struct Counted(#[allow(dead_code)] u32);

    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut world = World::new();
    let e = world.create((Counted(1),));
    let before = DROPS.load(Ordering::SeqCst);

    world.add_component(e, NoDefault(7)).unwrap();
    assert_eq!(*world.get_component::<NoDefault>(e).unwrap(), NoDefault(7));
    assert_eq!(DROPS.load(Ordering::SeqCst), before);

    drop(world);
    assert_eq!(DROPS.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_remove_component_survives_panicking_drop() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone, Default)]
    struct Counted(#[allow(dead_code)] u32);

    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut world = World::with_config(small_chunks());
    let e = world.create((Counted(1), Brittle(true)));
    let other = world.create((Counted(2), Brittle(false)));
    let before = DROPS.load(Ordering::SeqCst);

    let unwound = catch_unwind(AssertUnwindSafe(|| world.remove_component::<Brittle>(e)));
    assert!(unwound.is_err());

    assert!(world.has::<(Counted,)>(e));
    assert!(!world.has::<(Brittle,)>(e));
    assert!(world.has::<(Counted, Brittle)>(other));
    assert_slots_consistent(&world);
    assert_capacity_coupled(&world);

    world.destroy(other).unwrap();
    world.destroy(e).unwrap();
    drop(world);
    assert_eq!(DROPS.load(Ordering::SeqCst), before + 2);
}

#[test]
fn test_destroy_survives_panicking_drop() {
    let mut world = World::with_config(small_chunks());
    let doomed = world.create((Health(1), Brittle(true)));
    let kept = world.create((Health(2), Brittle(false)));

    let unwound = catch_unwind(AssertUnwindSafe(|| world.destroy(doomed)));
    assert!(unwound.is_err());

    assert!(!world.is_alive(doomed));
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.entity_info(kept).unwrap().slot, Slot::new(0, 0));
    assert_eq!(*world.get_component::<Health>(kept).unwrap(), Health(2));
    assert_slots_consistent(&world);
    world.destroy(kept).unwrap();
}

#[test]
fn test_bulk_create_stays_consistent_when_clone_panics() {
    static CLONES_LEFT: AtomicUsize = AtomicUsize::new(usize::MAX);

    #[derive(Default, Debug, PartialEq)]
    struct Flaky(u32);

    impl Clone for Flaky {
        fn clone(&self) -> Self {
            let left = CLONES_LEFT.load(Ordering::SeqCst);
            if left == 0 {
                panic!("clone budget exhausted");
            }
            CLONES_LEFT.store(left - 1, Ordering::SeqCst);
            Flaky(self.0)
        }
    }

    let mut world = World::with_config(small_chunks());
    let first = world.create((Flaky(1),));

    CLONES_LEFT.store(3, Ordering::SeqCst);
    let unwound = catch_unwind(AssertUnwindSafe(|| world.create_many(5, (Flaky(2),))));
    assert!(unwound.is_err());
    CLONES_LEFT.store(usize::MAX, Ordering::SeqCst);

    assert_eq!(world.entity_count(), 6);
    assert_slots_consistent(&world);
    assert_capacity_coupled(&world);

    world.destroy(first).unwrap();
    assert_eq!(world.entity_count(), 5);
    assert_slots_consistent(&world);
}

#[test]
fn test_create_recovers_from_panicking_default() {
    let mut world = World::with_config(small_chunks());

    let unwound = catch_unwind(AssertUnwindSafe(|| {
        world.create_partial::<(NoDefault, Health)>((None, Some(Health(1))))
    }));
    assert!(unwound.is_err());
    assert_eq!(world.entity_count(), 0);
    assert_capacity_coupled(&world);

    let e = world.create((Health(2),));
    assert_eq!(*world.get_component::<Health>(e).unwrap(), Health(2));
    assert_eq!(world.entity_count(), 1);
    assert_slots_consistent(&world);
    assert_capacity_coupled(&world);
    world.destroy(e).unwrap();
    assert_eq!(world.entity_count(), 0);
}
