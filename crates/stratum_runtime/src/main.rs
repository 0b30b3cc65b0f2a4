//! Stratum Runtime
//!
//! Small driver that boots logging, loads an optional world config and runs a
//! bulk-create / parallel-update / destroy workload against the core.
//!
//! Usage: `stratum [config.json]`

use std::time::Instant;

use anyhow::{Context, Result};
use stratum_core::ecs::Entity;
use stratum_core::{QueryDescription, World, WorldConfig};
use tracing_subscriber::EnvFilter;

const ENTITIES: usize = 100_000;
const TICKS: usize = 60;
const DT: f32 = 1.0 / 60.0;

#[derive(Clone, Copy, Debug, Default)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Sleeping;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Stratum v{}", stratum_core::VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => WorldConfig::load(&path)
            .with_context(|| format!("loading world config from {path}"))?,
        None => WorldConfig::default(),
    };
    tracing::info!(
        chunk_size_bytes = config.chunk_size_bytes,
        dispatcher = ?config.dispatcher,
        "world config"
    );

    let mut world = World::with_config(config);

    let started = Instant::now();
    let mut entities: Vec<Entity> = Vec::with_capacity(ENTITIES);
    world.create_many_into(
        ENTITIES,
        (Position::default(), Velocity { x: 1.0, y: 0.5 }),
        &mut entities,
    );
    tracing::info!(
        entities = world.entity_count(),
        capacity = world.capacity(),
        elapsed = ?started.elapsed(),
        "bulk create finished"
    );

    // Park every tenth entity so the update query has something to skip.
    for &entity in entities.iter().step_by(10) {
        world.add_component(entity, Sleeping)?;
    }

    let moving = QueryDescription::new()
        .with_all::<(Position, Velocity)>()
        .with_none::<(Sleeping,)>();

    let started = Instant::now();
    for _ in 0..TICKS {
        world.parallel_query::<(Position, Velocity), _>(
            &moving,
            |(position, velocity): (&mut Position, &mut Velocity)| {
                position.x += velocity.x * DT;
                position.y += velocity.y * DT;
            },
        );
    }
    tracing::info!(
        ticks = TICKS,
        moving = world.count(&moving),
        elapsed = ?started.elapsed(),
        "parallel update finished"
    );

    let sample = entities[1];
    let position = world.get_component::<Position>(sample)?;
    tracing::info!(entity = %sample, x = position.x, y = position.y, "sample position");

    let started = Instant::now();
    for &entity in entities.iter().skip(1).step_by(2) {
        world.destroy(entity)?;
    }
    let released = world.trim_excess();
    tracing::info!(
        entities = world.entity_count(),
        archetypes = world.archetype_count(),
        capacity = world.capacity(),
        released,
        elapsed = ?started.elapsed(),
        "destroy pass finished"
    );

    Ok(())
}
