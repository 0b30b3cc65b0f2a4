// world.rs - Entity lifecycle and typed access over archetype storage
//
// The world owns one archetype per distinct signature, the entity id
// allocator and the entity -> slot map. Every structural change (create,
// destroy, add/remove component) goes through here so the slot map is
// updated in the same call that moves rows around.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use thiserror::Error;

use crate::config::WorldConfig;
use crate::ecs::entity::EntityAllocator;
use crate::ecs::{
    component_type, id_of, Archetype, ArchetypeId, Chunk, ChunkDispatcher, Component,
    ComponentSet, ComponentType, Entity, EntityEvents, EntityInfo, EntityInfoStorage,
    QueryDescription, Signature, Slot, WorldId,
};
use crate::pool::ScratchPool;

static WORLD_IDS: WorldIds = WorldIds::new(0);

/// Process-wide source of world ids.
///
/// Ids are never reused: a handle from one world must not resolve in
/// another, so running out is fatal rather than wrapping around.
struct WorldIds(AtomicU16);

impl WorldIds {
    const fn new(first: WorldId) -> Self {
        Self(AtomicU16::new(first))
    }

    fn next(&self) -> WorldId {
        match self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        {
            Ok(id) => id,
            Err(_) => panic!("world id space exhausted ({} worlds created)", WorldId::MAX),
        }
    }
}

/// Errors returned by entity-addressed world operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0:?} is not alive")]
    EntityNotAlive(Entity),

    #[error("entity {entity:?} does not belong to world {world}")]
    ForeignEntity { entity: Entity, world: WorldId },

    #[error("entity {entity:?} has no component `{component}`")]
    ComponentNotPresent {
        entity: Entity,
        component: &'static str,
    },

    #[error("entity {entity:?} already has component `{component}`")]
    ComponentAlreadyPresent {
        entity: Entity,
        component: &'static str,
    },
}

/// The archetype store.
pub struct World {
    id: WorldId,
    config: WorldConfig,
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeId>,
    entity_info: EntityInfoStorage,
    allocator: EntityAllocator,
    capacity: usize,
    dispatcher: Box<dyn ChunkDispatcher>,
    events: Option<Box<dyn EntityEvents>>,
    entity_scratch: ScratchPool<Entity>,
    slot_scratch: ScratchPool<Slot>,
}

impl World {
    /// Create an empty world with the default configuration.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let config = config.normalized();
        let id = WORLD_IDS.next();
        tracing::debug!(
            world = id,
            chunk_size_bytes = config.chunk_size_bytes,
            dispatcher = ?config.dispatcher,
            "created world"
        );
        Self {
            id,
            dispatcher: config.dispatcher.dispatcher(),
            config,
            archetypes: Vec::new(),
            by_signature: HashMap::new(),
            entity_info: EntityInfoStorage::new(),
            allocator: EntityAllocator::new(),
            capacity: 0,
            events: None,
            entity_scratch: ScratchPool::new(),
            slot_scratch: ScratchPool::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> WorldId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Rows allocated across every archetype, spare chunks included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries the entity slot map can hold without reallocating.
    #[inline]
    pub fn entity_info_capacity(&self) -> usize {
        self.entity_info.capacity()
    }

    /// Live entities.
    pub fn entity_count(&self) -> usize {
        self.archetypes.iter().map(Archetype::entity_count).sum()
    }

    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    #[inline]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Id of the archetype holding exactly `signature`, if it exists.
    pub fn find_archetype(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Id of the archetype holding exactly `signature`, creating it on first use.
    pub fn archetype_for(&mut self, signature: &Signature) -> ArchetypeId {
        if let Some(&id) = self.by_signature.get(signature) {
            return id;
        }
        let index = u32::try_from(self.archetypes.len())
            .unwrap_or_else(|_| panic!("archetype id space exhausted"));
        let id = ArchetypeId::new(index);
        self.archetypes.push(Archetype::new(
            id,
            signature.clone(),
            self.config.chunk_size_bytes,
        ));
        self.by_signature.insert(signature.clone(), id);
        id
    }

    /// Install lifecycle hooks, replacing any previous ones.
    pub fn set_events(&mut self, events: Box<dyn EntityEvents>) {
        self.events = Some(events);
    }

    pub fn clear_events(&mut self) -> Option<Box<dyn EntityEvents>> {
        self.events.take()
    }

    pub fn set_dispatcher(&mut self, dispatcher: Box<dyn ChunkDispatcher>) {
        self.dispatcher = dispatcher;
    }

    #[inline]
    pub fn dispatcher(&self) -> &dyn ChunkDispatcher {
        self.dispatcher.as_ref()
    }

    /// Current location of a live entity.
    pub fn entity_info(&self, entity: Entity) -> Result<&EntityInfo, WorldError> {
        if entity.world() != self.id {
            return Err(WorldError::ForeignEntity {
                entity,
                world: self.id,
            });
        }
        self.entity_info
            .get(entity)
            .ok_or(WorldError::EntityNotAlive(entity))
    }

    #[inline]
    fn resolve(&self, entity: Entity) -> Result<EntityInfo, WorldError> {
        self.entity_info(entity).copied()
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_info(entity).is_ok()
    }

    /// Whether `entity` is alive and carries every member of `S`.
    pub fn has<S: ComponentSet>(&self, entity: Entity) -> bool {
        self.resolve(entity)
            .map(|info| self.archetypes[info.archetype.index()].has::<S>())
            .unwrap_or(false)
    }

    /// Account for rows an archetype just allocated and keep the slot map
    /// at least as large as the world's capacity.
    fn track_allocation(&mut self, allocated: usize) {
        if allocated > 0 {
            self.capacity += allocated;
            self.entity_info.ensure_capacity(self.capacity);
        }
    }

    fn missing_component<S: ComponentSet>(
        &self,
        entity: Entity,
        archetype: ArchetypeId,
    ) -> WorldError {
        let archetype = &self.archetypes[archetype.index()];
        let component = S::info()
            .declared()
            .iter()
            .find(|ty| !archetype.has_component(ty.id()))
            .map_or("?", ComponentType::name);
        WorldError::ComponentNotPresent { entity, component }
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Create one entity holding `values`.
    pub fn create<S: ComponentSet>(&mut self, values: S) -> Entity {
        self.create_partial::<S>(values.into_partial())
    }

    /// Create one entity; `None` members start at their default value.
    pub fn create_partial<S: ComponentSet>(&mut self, partial: S::Partial) -> Entity {
        let info = S::info();
        let archetype_id = self.archetype_for(info.signature());
        let entity = self.allocator.allocate(self.id);

        let allocated = self.archetypes[archetype_id.index()].reserve(1);
        self.track_allocation(allocated);

        // Register the default row before member values run any drop code.
        let archetype = &mut self.archetypes[archetype_id.index()];
        let (slot, grown) = archetype.add_entity(entity);
        debug_assert_eq!(grown, 0, "reserve left no free row");
        self.entity_info.insert(entity, archetype_id, slot);
        archetype.set::<S>(slot, partial);

        if let Some(events) = &self.events {
            events.on_entity_created(entity);
            for ty in info.declared() {
                events.on_component_added(entity, ty);
            }
        }
        entity
    }

    /// Create `amount` entities that all start with `values`.
    pub fn create_many<S: ComponentSet>(&mut self, amount: usize, values: S) {
        self.bulk_create::<S>(amount, &values.into_partial(), None);
    }

    /// Like [`create_many`](Self::create_many), appending the new handles to `out`.
    pub fn create_many_into<S: ComponentSet>(
        &mut self,
        amount: usize,
        values: S,
        out: &mut Vec<Entity>,
    ) {
        out.reserve(amount);
        self.bulk_create::<S>(amount, &values.into_partial(), Some(out));
    }

    /// Bulk create with per-member defaults.
    pub fn create_many_partial<S: ComponentSet>(&mut self, amount: usize, partial: &S::Partial) {
        self.bulk_create::<S>(amount, partial, None);
    }

    fn bulk_create<S: ComponentSet>(
        &mut self,
        amount: usize,
        partial: &S::Partial,
        out: Option<&mut Vec<Entity>>,
    ) {
        if amount == 0 {
            return;
        }
        let info = S::info();
        let archetype_id = self.archetype_for(info.signature());

        // One growth step for the whole batch.
        let allocated = self.archetypes[archetype_id.index()].reserve(amount);
        self.track_allocation(allocated);

        let world = self.id;
        let mut entities = self.entity_scratch.rent(amount);
        let mut slots = self.slot_scratch.rent(amount);
        for entity in entities.iter_mut() {
            *entity = self.allocator.allocate(world);
        }

        // Rows are registered as they are occupied, so cloning the values
        // in only ever touches entities the slot map already knows.
        let archetype = &mut self.archetypes[archetype_id.index()];
        let entity_info = &mut self.entity_info;
        let grown = archetype.add_all(&entities, &mut slots, |placed, at| {
            entity_info.insert_all(placed, archetype_id, at);
        });
        debug_assert_eq!(grown, 0, "reserve left the batch short of rows");
        archetype.set_range::<S>(slots[0], slots[amount - 1], partial);

        if let Some(out) = out {
            out.extend_from_slice(&entities);
        }
        if let Some(events) = &self.events {
            for &entity in entities.iter() {
                events.on_entity_created(entity);
                for ty in info.declared() {
                    events.on_component_added(entity, ty);
                }
            }
        }

        tracing::debug!(
            amount,
            archetype = archetype_id.index(),
            allocated,
            "bulk created entities"
        );
    }

    /// Grow the archetype for `S` so `additional` more entities fit.
    pub fn reserve<S: ComponentSet>(&mut self, additional: usize) {
        let archetype_id = self.archetype_for(S::info().signature());
        let allocated = self.archetypes[archetype_id.index()].reserve(additional);
        self.track_allocation(allocated);
    }

    /// Release every empty spare chunk. Returns the rows released.
    pub fn trim_excess(&mut self) -> usize {
        let released: usize = self
            .archetypes
            .iter_mut()
            .map(Archetype::trim_excess)
            .sum();
        self.capacity -= released;
        released
    }

    // ---------------------------------------------------------------------
    // Access
    // ---------------------------------------------------------------------

    /// Mutable references to every member of `S` on `entity`.
    pub fn get<S: ComponentSet>(&mut self, entity: Entity) -> Result<S::Refs<'_>, WorldError> {
        let info = self.resolve(entity)?;
        if !self.archetypes[info.archetype.index()].has::<S>() {
            return Err(self.missing_component::<S>(entity, info.archetype));
        }
        Ok(self.archetypes[info.archetype.index()].get::<S>(info.slot))
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, WorldError> {
        let info = self.resolve(entity)?;
        let archetype = &self.archetypes[info.archetype.index()];
        if !archetype.has_component(id_of::<T>()) {
            return Err(WorldError::ComponentNotPresent {
                entity,
                component: component_type::<T>().name(),
            });
        }
        Ok(&archetype.chunks()[info.slot.chunk_index].column::<T>()[info.slot.index])
    }

    /// Overwrite every member of `S` on `entity`.
    pub fn set<S: ComponentSet>(&mut self, entity: Entity, values: S) -> Result<(), WorldError> {
        self.set_partial::<S>(entity, values.into_partial())
    }

    /// Overwrite every member of `S`; `None` members are reset to default.
    ///
    /// All values are written before the first `on_component_set` fires.
    pub fn set_partial<S: ComponentSet>(
        &mut self,
        entity: Entity,
        partial: S::Partial,
    ) -> Result<(), WorldError> {
        let info = self.resolve(entity)?;
        let archetype = &mut self.archetypes[info.archetype.index()];
        if !archetype.has::<S>() {
            return Err(self.missing_component::<S>(entity, info.archetype));
        }
        archetype.set::<S>(info.slot, partial);

        if let Some(events) = &self.events {
            for ty in S::info().declared() {
                events.on_component_set(entity, ty);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Structural changes
    // ---------------------------------------------------------------------

    /// Destroy `entity`; every handle to it goes stale.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), WorldError> {
        let info = self.resolve(entity)?;
        if let Some(events) = &self.events {
            events.on_entity_destroyed(entity);
        }

        // Bookkeeping first: dropping the row runs component destructors.
        let archetype = &mut self.archetypes[info.archetype.index()];
        if let Some(moved) = archetype.backfill_for(info.slot) {
            self.entity_info.set_slot(moved, info.slot);
        }
        let version = self.entity_info.release(entity);
        self.allocator.recycle(entity.id(), version);
        archetype.remove(info.slot);
        Ok(())
    }

    /// Attach `value` to `entity`, moving it to the archetype with `T` added.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        let info = self.resolve(entity)?;
        let ty = component_type::<T>();
        let src = info.archetype;
        if self.archetypes[src.index()].has_component(ty.id()) {
            return Err(WorldError::ComponentAlreadyPresent {
                entity,
                component: ty.name(),
            });
        }

        let dst = match self.archetypes[src.index()].add_edge(ty.id()) {
            Some(dst) => dst,
            None => {
                let signature = self.archetypes[src.index()]
                    .signature()
                    .with(ty)
                    .map_err(|_| WorldError::ComponentAlreadyPresent {
                        entity,
                        component: ty.name(),
                    })?;
                let dst = self.archetype_for(&signature);
                self.link(src, dst, ty);
                dst
            }
        };

        self.move_entity(entity, info.slot, src, dst, Some(value));

        if let Some(events) = &self.events {
            events.on_component_added(entity, &ty);
        }
        Ok(())
    }

    /// Detach `T` from `entity`, dropping its value.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let info = self.resolve(entity)?;
        let ty = component_type::<T>();
        let src = info.archetype;
        if !self.archetypes[src.index()].has_component(ty.id()) {
            return Err(WorldError::ComponentNotPresent {
                entity,
                component: ty.name(),
            });
        }

        let dst = match self.archetypes[src.index()].remove_edge(ty.id()) {
            Some(dst) => dst,
            None => {
                let signature = self.archetypes[src.index()].signature().without(ty);
                let dst = self.archetype_for(&signature);
                self.link(dst, src, ty);
                dst
            }
        };

        let removed = self.move_entity::<T>(entity, info.slot, src, dst, None);

        if let Some(events) = &self.events {
            events.on_component_removed(entity, &ty);
        }
        drop(removed);
        Ok(())
    }

    /// Record that adding `ty` to `without` leads to `with`, and back.
    fn link(&mut self, without: ArchetypeId, with: ArchetypeId, ty: ComponentType) {
        self.archetypes[without.index()].set_add_edge(ty.id(), with);
        self.archetypes[with.index()].set_remove_edge(ty.id(), without);
    }

    /// Move a row between two archetypes that differ by `T` and fix up the
    /// slot map. Returns the value of `T` when `dst` lacks it.
    fn move_entity<T: Component>(
        &mut self,
        entity: Entity,
        slot: Slot,
        src: ArchetypeId,
        dst: ArchetypeId,
        added: Option<T>,
    ) -> Option<T> {
        let (from, to) = pair_mut(&mut self.archetypes, src.index(), dst.index());
        let transfer = from.move_entity(slot, to, added);
        self.track_allocation(transfer.allocated);
        self.entity_info.relocate(entity, dst, transfer.slot);
        if let Some(moved) = transfer.backfilled {
            self.entity_info.set_slot(moved, slot);
        }
        transfer.removed
    }

    // ---------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------

    /// Live entities in archetypes selected by `description`.
    pub fn count(&self, description: &QueryDescription) -> usize {
        self.archetypes
            .iter()
            .filter(|archetype| description.matches_signature(archetype.signature()))
            .map(Archetype::entity_count)
            .sum()
    }

    /// Visit every occupied chunk of every archetype `description` selects.
    pub fn for_each_chunk<F>(&mut self, description: &QueryDescription, mut f: F)
    where
        F: FnMut(&mut Chunk),
    {
        for archetype in self.archetypes.iter_mut() {
            if !description.matches_signature(archetype.signature()) {
                continue;
            }
            for chunk in archetype.chunks_mut() {
                f(chunk);
            }
        }
    }

    /// Call `f` for every entity that matches `description` and carries `S`.
    pub fn query<S, F>(&mut self, description: &QueryDescription, mut f: F)
    where
        S: ComponentSet,
        F: for<'a> FnMut(Entity, S::Refs<'a>),
    {
        let required = S::info().signature();
        for archetype in self.archetypes.iter_mut() {
            if !description.matches_signature(archetype.signature())
                || !archetype.signature().contains_all(required)
            {
                continue;
            }
            for chunk in archetype.chunks_mut() {
                let indices = chunk.index_of::<S>();
                for row in 0..chunk.len() {
                    let entity = chunk.entity(row);
                    // SAFETY: indices come from this chunk and are distinct
                    // (the set's signature rejects duplicates), the row is
                    // occupied, and `f` cannot keep the references past the
                    // call.
                    f(entity, unsafe { chunk.get_unchecked::<S>(indices, row) });
                }
            }
        }
    }

    /// Run `f` on every entity that matches `description` and carries `S`,
    /// handing whole chunks to the configured dispatcher.
    pub fn parallel_query<S, F>(&mut self, description: &QueryDescription, f: F)
    where
        S: ComponentSet,
        F: for<'a> Fn(S::Refs<'a>) + Send + Sync,
    {
        let required = S::info().signature();
        let mut chunks: Vec<&mut Chunk> = self
            .archetypes
            .iter_mut()
            .filter(|archetype| {
                description.matches_signature(archetype.signature())
                    && archetype.signature().contains_all(required)
            })
            .flat_map(|archetype| archetype.chunks_mut().iter_mut())
            .collect();
        if chunks.is_empty() {
            return;
        }

        let job = |chunk: &mut Chunk| {
            let indices = chunk.index_of::<S>();
            for row in 0..chunk.len() {
                // SAFETY: as in `query`; each chunk is visited by exactly
                // one job.
                f(unsafe { chunk.get_unchecked::<S>(indices, row) });
            }
        };
        self.dispatcher.dispatch(&mut chunks, &job);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entity_count())
            .field("archetypes", &self.archetypes.len())
            .field("capacity", &self.capacity)
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}

/// Two distinct elements of one slice, both mutably.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "pair_mut needs distinct indices");
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
