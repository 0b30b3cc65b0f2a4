//! Entity handle with generational index
//!
//! Entities are lightweight handles that reference data in a World.
//! The version counter prevents use-after-free bugs.

use std::collections::VecDeque;
use std::fmt;

pub type WorldId = u16;

/// Entity handle (version-indexed for safety)
///
/// - `id`: position in the world's slot map
/// - `version`: incremented when the entity is destroyed, so stale handles
///   stop resolving
/// - `world`: id of the world that created the handle
///
/// Example:
/// ```ignore
/// let entity = world.create((Position::default(),));
/// world.destroy(entity)?;
/// // entity handle is now stale (version mismatch)
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    id: u32,
    version: u32,
    world: WorldId,
}

impl Entity {
    /// Placeholder used for unoccupied chunk rows.
    pub const NULL: Entity = Entity {
        id: u32::MAX,
        version: 0,
        world: WorldId::MAX,
    };

    pub(crate) const fn new(id: u32, version: u32, world: WorldId) -> Self {
        Self { id, version, world }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn world(&self) -> WorldId {
        self.world
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{}@{})", self.id, self.version, self.world)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.version)
    }
}

/// Hands out entity ids, preferring recycled ones.
///
/// A recycled id comes back with the version that was current when it was
/// released, which is already one past the version of any handle issued
/// before.
#[derive(Debug, Default)]
pub(crate) struct EntityAllocator {
    next_id: u32,
    recycled: VecDeque<(u32, u32)>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, world: WorldId) -> Entity {
        if let Some((id, version)) = self.recycled.pop_front() {
            return Entity::new(id, version, world);
        }
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("entity id space exhausted"));
        Entity::new(id, 0, world)
    }

    /// Return an id whose version has already been bumped.
    pub fn recycle(&mut self, id: u32, version: u32) {
        self.recycled.push_back((id, version));
    }

    /// Number of distinct ids ever handed out.
    #[cfg(test)]
    pub fn issued(&self) -> u32 {
        self.next_id
    }

    #[cfg(test)]
    pub fn recycled_len(&self) -> usize {
        self.recycled.len()
    }
}
