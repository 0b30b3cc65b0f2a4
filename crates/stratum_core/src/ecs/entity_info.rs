// entity_info.rs - Entity -> (archetype, slot) map
//
// Indexed by entity id. Each entry remembers where the entity's row lives
// and the version a handle must carry to resolve. Destroyed entries keep a
// bumped version, so every handle issued before the destroy goes stale.

use crate::ecs::{ArchetypeId, Entity, Slot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityInfo {
    pub archetype: ArchetypeId,
    pub slot: Slot,
    pub version: u32,
}

impl EntityInfo {
    /// Placeholder for an id that was issued but never placed. No handle
    /// carries its version.
    const VACANT: EntityInfo = EntityInfo {
        archetype: ArchetypeId::new(u32::MAX),
        slot: Slot::new(usize::MAX, usize::MAX),
        version: u32::MAX,
    };
}

#[derive(Debug, Default)]
pub struct EntityInfoStorage {
    entries: Vec<EntityInfo>,
}

impl EntityInfoStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserved entry count; kept at or above the world's row capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Grow the backing storage so `capacity` entries fit without
    /// reallocation.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.entries.capacity() {
            self.entries.reserve_exact(capacity - self.entries.len());
        }
    }

    /// Resolve a handle; stale versions and unknown ids yield `None`.
    #[inline]
    pub fn get(&self, entity: Entity) -> Option<&EntityInfo> {
        self.entries
            .get(entity.id() as usize)
            .filter(|info| info.version == entity.version())
    }

    /// Record a newly created (or recycled) entity.
    pub fn insert(&mut self, entity: Entity, archetype: ArchetypeId, slot: Slot) {
        let info = EntityInfo {
            archetype,
            slot,
            version: entity.version(),
        };
        let index = entity.id() as usize;
        if index < self.entries.len() {
            self.entries[index] = info;
        } else {
            // A create that unwound before placing its row skips ids.
            self.entries.resize(index, EntityInfo::VACANT);
            self.entries.push(info);
        }
    }

    /// Record a batch of entities placed into one archetype.
    pub fn insert_all(&mut self, entities: &[Entity], archetype: ArchetypeId, slots: &[Slot]) {
        debug_assert_eq!(entities.len(), slots.len());
        for (entity, slot) in entities.iter().zip(slots) {
            self.insert(*entity, archetype, *slot);
        }
    }

    /// Point a live entity at a new location after a move.
    pub fn relocate(&mut self, entity: Entity, archetype: ArchetypeId, slot: Slot) {
        let info = &mut self.entries[entity.id() as usize];
        debug_assert_eq!(info.version, entity.version());
        info.archetype = archetype;
        info.slot = slot;
    }

    /// Update only the slot of a live entity (swap-compaction backfill).
    pub fn set_slot(&mut self, entity: Entity, slot: Slot) {
        let info = &mut self.entries[entity.id() as usize];
        debug_assert_eq!(info.version, entity.version());
        info.slot = slot;
    }

    /// Invalidate every handle to `entity`, returning the next version.
    pub fn release(&mut self, entity: Entity) -> u32 {
        let info = &mut self.entries[entity.id() as usize];
        info.version = info.version.wrapping_add(1);
        info.version
    }
}
