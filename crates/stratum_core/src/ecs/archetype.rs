// archetype.rs - Chunk list and entity placement for one signature
//
// An archetype owns every chunk whose entities share one component
// signature. Occupied chunks form a packed prefix of `chunks`: all of them
// are full except the last, which is the only place new rows go. Chunks
// past the prefix are empty spares kept for reuse.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ecs::chunk::{chunk_capacity, Chunk, ComponentLookup};
use crate::ecs::{Component, ComponentSet, ComponentTypeId, Entity, Signature};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Location of one entity's row inside its archetype.
///
/// Only valid until the next structural change of that archetype; always
/// re-read it from the world's entity info.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub chunk_index: usize,
    pub index: usize,
}

impl Slot {
    pub const fn new(chunk_index: usize, index: usize) -> Self {
        Self { chunk_index, index }
    }
}

/// Outcome of moving one row to another archetype.
pub(crate) struct Transfer<T> {
    pub slot: Slot,
    pub allocated: usize,
    pub backfilled: Option<Entity>,
    pub removed: Option<T>,
}

/// Closes a dropped row's hole when it goes out of scope, unwinding or not.
struct Hole<'a> {
    archetype: &'a mut Archetype,
    slot: Slot,
}

impl Drop for Hole<'_> {
    fn drop(&mut self) {
        // SAFETY: the row at `slot` was dropped and nothing has refilled it.
        unsafe {
            self.archetype.fill_hole(self.slot);
        }
    }
}

pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    lookup: Arc<ComponentLookup>,
    chunk_capacity: usize,
    chunks: Vec<Chunk>,
    chunk_count: usize,
    entity_count: usize,
    add_edges: HashMap<ComponentTypeId, ArchetypeId>,
    remove_edges: HashMap<ComponentTypeId, ArchetypeId>,
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, signature: Signature, chunk_bytes: usize) -> Self {
        let chunk_capacity = chunk_capacity(&signature, chunk_bytes);
        let lookup = Arc::new(ComponentLookup::new(&signature));
        tracing::debug!(
            archetype = id.index(),
            signature = ?signature,
            chunk_capacity,
            "created archetype"
        );
        Self {
            id,
            signature,
            lookup,
            chunk_capacity,
            chunks: Vec::new(),
            chunk_count: 0,
            entity_count: 0,
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Rows per chunk.
    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    /// Rows reserved across every allocated chunk, spares included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_capacity
    }

    /// Number of chunks holding at least one entity.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of allocated chunks, spares included.
    #[inline]
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Occupied chunks in order.
    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks[..self.chunk_count]
    }

    #[inline]
    pub fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks[..self.chunk_count]
    }

    /// Whether every member of `S` is part of this archetype.
    #[inline]
    pub fn has<S: ComponentSet>(&self) -> bool {
        self.signature.contains_all(S::info().signature())
    }

    #[inline]
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.signature.contains(id)
    }

    #[inline]
    pub fn entity_at(&self, slot: Slot) -> Entity {
        self.chunks()[slot.chunk_index].entity(slot.index)
    }

    /// Entities of every occupied row, chunk by chunk.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.chunks().iter().flat_map(|chunk| chunk.entities().iter().copied())
    }

    /// Index of the chunk the next row goes into and the rows allocated to
    /// provide it. A fresh chunk is pushed only when none has room.
    ///
    /// The chunk joins the occupied prefix once the caller has pushed into
    /// it, so a push that unwinds never leaves an empty chunk in the prefix.
    fn open_chunk(&mut self) -> (usize, usize) {
        if self.chunk_count > 0 && !self.chunks[self.chunk_count - 1].is_full() {
            return (self.chunk_count - 1, 0);
        }
        if self.chunk_count < self.chunks.len() {
            return (self.chunk_count, 0);
        }
        self.chunks.push(Chunk::new(
            &self.signature,
            Arc::clone(&self.lookup),
            self.chunk_capacity,
        ));
        tracing::trace!(
            archetype = self.id.index(),
            chunks = self.chunks.len(),
            "allocated chunk"
        );
        (self.chunk_count, self.chunk_capacity)
    }

    /// Grow by whole chunks until `additional` more entities fit.
    ///
    /// Returns the rows allocated (a multiple of the chunk capacity).
    pub(crate) fn reserve(&mut self, additional: usize) -> usize {
        let free = self.capacity() - self.entity_count;
        let missing = additional.saturating_sub(free);
        if missing == 0 {
            return 0;
        }
        let new_chunks = missing.div_ceil(self.chunk_capacity);
        self.chunks.reserve(new_chunks);
        for _ in 0..new_chunks {
            self.chunks.push(Chunk::new(
                &self.signature,
                Arc::clone(&self.lookup),
                self.chunk_capacity,
            ));
        }
        tracing::trace!(
            archetype = self.id.index(),
            new_chunks,
            "reserved chunks"
        );
        new_chunks * self.chunk_capacity
    }

    /// Append one default-initialized row for `entity`.
    ///
    /// Returns the new slot and the rows allocated to make room.
    pub(crate) fn add_entity(&mut self, entity: Entity) -> (Slot, usize) {
        let (chunk_index, allocated) = self.open_chunk();
        let index = self.chunks[chunk_index].push(entity);
        self.chunk_count = chunk_index + 1;
        self.entity_count += 1;
        (Slot::new(chunk_index, index), allocated)
    }

    /// Append `entity` with the given values.
    ///
    /// Returns the new slot and the rows allocated to make room: zero when
    /// an existing chunk had space, the chunk capacity otherwise.
    #[cfg(test)]
    pub(crate) fn add<S: ComponentSet>(
        &mut self,
        entity: Entity,
        partial: S::Partial,
    ) -> (Slot, usize) {
        let (slot, allocated) = self.add_entity(entity);
        self.chunks[slot.chunk_index].set::<S>(slot.index, partial);
        (slot, allocated)
    }

    /// Append every entity of `entities` with default values, writing each
    /// one's slot into `slots`. Rows are contiguous across chunk boundaries.
    ///
    /// `placed` sees each chunk's run of new entities and slots as soon as
    /// those rows are occupied, before the next chunk is filled.
    pub(crate) fn add_all<F>(
        &mut self,
        entities: &[Entity],
        slots: &mut [Slot],
        mut placed: F,
    ) -> usize
    where
        F: FnMut(&[Entity], &[Slot]),
    {
        debug_assert_eq!(entities.len(), slots.len());
        let mut allocated = 0;
        let mut done = 0;
        while done < entities.len() {
            let (chunk_index, grown) = self.open_chunk();
            allocated += grown;
            let rows = self.chunks[chunk_index].push_many(&entities[done..]);
            self.chunk_count = chunk_index + 1;
            self.entity_count += rows.len();
            let run = done..done + rows.len();
            for (slot, index) in slots[run.clone()].iter_mut().zip(rows) {
                *slot = Slot::new(chunk_index, index);
            }
            placed(&entities[run.clone()], &slots[run.clone()]);
            done = run.end;
        }
        allocated
    }

    /// Write one value set into every row from `first` to `last` inclusive.
    pub fn set_range<S: ComponentSet>(&mut self, first: Slot, last: Slot, partial: &S::Partial) {
        assert!(first <= last, "range start {first:?} is after end {last:?}");
        let indices = S::indices(&self.lookup);
        for chunk_index in first.chunk_index..=last.chunk_index {
            let chunk = &mut self.chunks[..self.chunk_count][chunk_index];
            let start = if chunk_index == first.chunk_index {
                first.index
            } else {
                0
            };
            let end = if chunk_index == last.chunk_index {
                last.index + 1
            } else {
                chunk.len()
            };
            chunk.fill::<S>(indices, start..end, partial);
        }
    }

    /// Mutable references to every member of `S` at `slot`.
    #[inline]
    pub fn get<S: ComponentSet>(&mut self, slot: Slot) -> S::Refs<'_> {
        self.chunks_mut()[slot.chunk_index].get::<S>(slot.index)
    }

    /// Overwrite every member of `S` at `slot`; `None` writes the default.
    #[inline]
    pub fn set<S: ComponentSet>(&mut self, slot: Slot, partial: S::Partial) {
        self.chunks_mut()[slot.chunk_index].set::<S>(slot.index, partial);
    }

    /// Remove the row at `slot` by swap-compaction.
    ///
    /// Returns the entity moved into `slot`, the same one
    /// [`backfill_for`](Self::backfill_for) reports beforehand. The hole is
    /// closed even if a component destructor unwinds; the rest of that row
    /// then leaks.
    pub(crate) fn remove(&mut self, slot: Slot) -> Option<Entity> {
        let backfilled = self.backfill_for(slot);
        let mut hole = Hole {
            archetype: self,
            slot,
        };
        // SAFETY: `slot` addresses an occupied row; `hole` fills it on drop.
        unsafe {
            hole.archetype.chunks[slot.chunk_index].drop_row(slot.index);
        }
        drop(hole);
        backfilled
    }

    /// The entity swap-compaction would move into `slot`, if any.
    pub(crate) fn backfill_for(&self, slot: Slot) -> Option<Entity> {
        let last_chunk = self.chunks().last()?;
        let last = Slot::new(self.chunk_count - 1, last_chunk.len() - 1);
        (slot != last).then(|| last_chunk.entity(last.index))
    }

    /// Move the row at `slot` into `dst`, whose signature differs from this
    /// one by `T` alone.
    ///
    /// When `dst` gains `T` it takes `added`; when it loses `T` the old value
    /// comes back in [`Transfer::removed`]. No component code runs during
    /// the move.
    pub(crate) fn move_entity<T: Component>(
        &mut self,
        slot: Slot,
        dst: &mut Archetype,
        added: Option<T>,
    ) -> Transfer<T> {
        debug_assert_ne!(self.id, dst.id);
        let entity = self.entity_at(slot);
        let (dst_chunk_index, allocated) = dst.open_chunk();
        let dst_chunk = &mut dst.chunks[dst_chunk_index];
        // SAFETY: the row is live, the signatures differ by `T`, and the hole
        // left behind is filled right after.
        unsafe {
            let (dst_index, removed) =
                self.chunks[slot.chunk_index].transfer_row(slot.index, dst_chunk, entity, added);
            dst.chunk_count = dst_chunk_index + 1;
            dst.entity_count += 1;
            let backfilled = self.fill_hole(slot);
            Transfer {
                slot: Slot::new(dst_chunk_index, dst_index),
                allocated,
                backfilled,
                removed,
            }
        }
    }

    /// Close the hole at `slot` with the archetype's last row.
    ///
    /// # Safety
    /// `slot` must be a hole (dropped or transferred out).
    unsafe fn fill_hole(&mut self, slot: Slot) -> Option<Entity> {
        let last = self.chunk_count - 1;
        let moved = if slot.chunk_index == last {
            self.chunks[last].fill_hole_from_last(slot.index)
        } else {
            let (head, tail) = self.chunks.split_at_mut(last);
            Some(head[slot.chunk_index].fill_hole_from(slot.index, &mut tail[0]))
        };
        self.entity_count -= 1;
        if self.chunks[last].is_empty() {
            self.chunk_count -= 1;
        }
        moved
    }

    /// Release spare chunks. Returns the rows released.
    pub(crate) fn trim_excess(&mut self) -> usize {
        let released = self.chunks.len() - self.chunk_count;
        if released > 0 {
            self.chunks.truncate(self.chunk_count);
            self.chunks.shrink_to_fit();
            tracing::trace!(archetype = self.id.index(), released, "released chunks");
        }
        released * self.chunk_capacity
    }

    pub(crate) fn add_edge(&self, id: ComponentTypeId) -> Option<ArchetypeId> {
        self.add_edges.get(&id).copied()
    }

    pub(crate) fn remove_edge(&self, id: ComponentTypeId) -> Option<ArchetypeId> {
        self.remove_edges.get(&id).copied()
    }

    pub(crate) fn set_add_edge(&mut self, id: ComponentTypeId, target: ArchetypeId) {
        self.add_edges.insert(id, target);
    }

    pub(crate) fn set_remove_edge(&mut self, id: ComponentTypeId, target: ArchetypeId) {
        self.remove_edges.insert(id, target);
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("entities", &self.entity_count)
            .field("chunks", &self.chunk_count)
            .field("chunk_capacity", &self.chunk_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Velocity {
        x: i32,
        y: i32,
    }

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Tag;

    fn archetype<S: ComponentSet>(rows_per_chunk: usize) -> Archetype {
        let signature = S::info().signature().clone();
        let row = signature.types().iter().map(|t| t.size()).sum::<usize>()
            + std::mem::size_of::<Entity>();
        Archetype::new(ArchetypeId::new(0), signature, row * rows_per_chunk)
    }

    fn entity(id: u32) -> Entity {
        Entity::new(id, 0, 0)
    }

    fn p(x: i32) -> Position {
        Position { x, y: x }
    }

    #[test]
    fn test_add_reports_allocated_rows() {
        let mut arch = archetype::<(Position, Velocity)>(2);
        assert_eq!(arch.chunk_capacity(), 2);

        let (s0, a0) = arch.add::<(Position, Velocity)>(entity(0), (Some(p(0)), None));
        let (s1, a1) = arch.add::<(Position, Velocity)>(entity(1), (Some(p(1)), None));
        let (s2, a2) = arch.add::<(Position, Velocity)>(entity(2), (Some(p(2)), None));

        assert_eq!((a0, a1, a2), (2, 0, 2));
        assert_eq!(s0, Slot::new(0, 0));
        assert_eq!(s1, Slot::new(0, 1));
        assert_eq!(s2, Slot::new(1, 0));
        assert_eq!(arch.entity_count(), 3);
        assert_eq!(arch.capacity(), 4);
        assert_eq!(*arch.get::<(Position,)>(s2).0, p(2));
    }

    #[test]
    fn test_has_uses_signature_bits() {
        let arch = archetype::<(Position, Velocity)>(4);
        assert!(arch.has::<(Position,)>());
        assert!(arch.has::<(Velocity, Position)>());
        assert!(!arch.has::<(Position, Tag)>());
    }

    #[test]
    fn test_add_all_spans_chunks() {
        let mut arch = archetype::<(Position,)>(3);
        arch.add::<(Position,)>(entity(0), (Some(p(0)),));

        let entities: Vec<Entity> = (1..=5).map(entity).collect();
        let mut slots = vec![Slot::default(); entities.len()];
        let allocated = arch.add_all(&entities, &mut slots, |_, _| {});

        assert_eq!(allocated, 3);
        assert_eq!(arch.entity_count(), 6);
        assert_eq!(
            slots,
            vec![
                Slot::new(0, 1),
                Slot::new(0, 2),
                Slot::new(1, 0),
                Slot::new(1, 1),
                Slot::new(1, 2),
            ]
        );
        for (e, s) in entities.iter().zip(&slots) {
            assert_eq!(arch.entity_at(*s), *e);
        }
    }

    #[test]
    fn test_set_range_crosses_chunk_boundaries() {
        let mut arch = archetype::<(Position, Velocity)>(2);
        let entities: Vec<Entity> = (0..5).map(entity).collect();
        let mut slots = vec![Slot::default(); entities.len()];
        arch.add_all(&entities, &mut slots, |_, _| {});

        arch.set_range::<(Position, Velocity)>(
            slots[1],
            slots[3],
            &(Some(p(7)), Some(Velocity { x: 1, y: 1 })),
        );

        let values: Vec<Position> = arch
            .chunks()
            .iter()
            .flat_map(|c| c.column::<Position>().iter().copied())
            .collect();
        assert_eq!(values, vec![p(0), p(7), p(7), p(7), p(0)]);
        assert_eq!(*arch.get::<(Velocity,)>(slots[2]).0, Velocity { x: 1, y: 1 });
        assert_eq!(*arch.get::<(Velocity,)>(slots[4]).0, Velocity::default());
    }

    #[test]
    fn test_reserve_allocates_whole_chunks() {
        let mut arch = archetype::<(Position,)>(4);
        assert_eq!(arch.reserve(5), 8);
        assert_eq!(arch.reserve(8), 0);
        assert_eq!(arch.allocated_chunks(), 2);
        assert_eq!(arch.chunk_count(), 0);

        let entities: Vec<Entity> = (0..8).map(entity).collect();
        let mut slots = vec![Slot::default(); 8];
        assert_eq!(arch.add_all(&entities, &mut slots, |_, _| {}), 0);
        assert_eq!(arch.chunk_count(), 2);
    }

    #[test]
    fn test_remove_backfills_from_last_chunk() {
        let mut arch = archetype::<(Position,)>(2);
        let mut slots = Vec::new();
        for id in 0..3 {
            let (slot, _) = arch.add::<(Position,)>(entity(id), (Some(p(id as i32)),));
            slots.push(slot);
        }

        // Entity 2 sits alone in chunk 1; removing entity 0 pulls it forward.
        let moved = arch.remove(slots[0]);
        assert_eq!(moved, Some(entity(2)));
        assert_eq!(arch.entity_at(slots[0]), entity(2));
        assert_eq!(*arch.get::<(Position,)>(slots[0]).0, p(2));
        assert_eq!(arch.chunk_count(), 1);
        assert_eq!(arch.allocated_chunks(), 2);
        assert_eq!(arch.entity_count(), 2);

        // Removing the last row moves nothing.
        assert_eq!(arch.remove(Slot::new(0, 1)), None);
        assert_eq!(arch.entity_count(), 1);
    }

    #[test]
    fn test_spare_chunks_are_reused_then_trimmed() {
        let mut arch = archetype::<(Position,)>(1);
        let (s0, _) = arch.add::<(Position,)>(entity(0), (None,));
        let (_, _) = arch.add::<(Position,)>(entity(1), (None,));
        arch.remove(s0);
        arch.remove(Slot::new(0, 0));
        assert_eq!(arch.chunk_count(), 0);
        assert_eq!(arch.allocated_chunks(), 2);

        let (_, allocated) = arch.add::<(Position,)>(entity(2), (None,));
        assert_eq!(allocated, 0);
        assert_eq!(arch.trim_excess(), 1);
        assert_eq!(arch.capacity(), 1);
    }

    #[test]
    fn test_move_entity_between_archetypes() {
        let mut src = archetype::<(Position,)>(2);
        let signature = <(Position, Velocity)>::info().signature().clone();
        let mut dst = Archetype::new(ArchetypeId::new(1), signature, 1024);

        let (s0, _) = src.add::<(Position,)>(entity(0), (Some(p(1)),));
        src.add::<(Position,)>(entity(1), (Some(p(2)),));

        let moved = src.move_entity(s0, &mut dst, Some(Velocity { x: 3, y: 4 }));
        assert_eq!(moved.allocated, dst.chunk_capacity());
        assert_eq!(moved.backfilled, Some(entity(1)));
        assert!(moved.removed.is_none());
        assert_eq!(src.entity_at(s0), entity(1));
        assert_eq!(src.entity_count(), 1);

        let (pos, vel) = dst.get::<(Position, Velocity)>(moved.slot);
        assert_eq!(*pos, p(1));
        assert_eq!(*vel, Velocity { x: 3, y: 4 });
        assert_eq!(dst.entity_at(moved.slot), entity(0));

        let back = dst.move_entity::<Velocity>(moved.slot, &mut src, None);
        assert_eq!(back.removed, Some(Velocity { x: 3, y: 4 }));
        assert_eq!(back.backfilled, None);
        assert!(dst.is_empty());
        assert_eq!(*src.get::<(Position,)>(back.slot).0, p(1));
    }

    #[test]
    fn test_backfill_for_predicts_remove() {
        let mut arch = archetype::<(Position,)>(2);
        let slots: Vec<Slot> = (0..3)
            .map(|id| arch.add::<(Position,)>(entity(id), (None,)).0)
            .collect();
        assert_eq!(arch.backfill_for(slots[2]), None);
        assert_eq!(arch.backfill_for(slots[0]), Some(entity(2)));
        assert_eq!(arch.remove(slots[0]), Some(entity(2)));
    }

    #[derive(Clone, Default)]
    struct Fragile(bool);

    impl Drop for Fragile {
        fn drop(&mut self) {
            if self.0 {
                self.0 = false;
                panic!("fragile component dropped");
            }
        }
    }

    #[test]
    fn test_remove_compacts_when_drop_unwinds() {
        let mut arch = archetype::<(Fragile,)>(2);
        let (s0, _) = arch.add::<(Fragile,)>(entity(0), (Some(Fragile(true)),));
        for id in 1..3 {
            arch.add::<(Fragile,)>(entity(id), (None,));
        }

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| arch.remove(s0)));
        assert!(unwound.is_err());
        assert_eq!(arch.entity_count(), 2);
        assert_eq!(arch.chunk_count(), 1);
        assert_eq!(arch.entity_at(s0), entity(2));
        assert_eq!(arch.chunks()[0].entities(), &[entity(2), entity(1)]);
    }
}
