// chunk.rs - Fixed-capacity struct-of-arrays block
//
// A chunk stores up to `capacity` entities of one archetype: one column per
// component type plus a parallel entity column. Row `i` of every column and
// of the entity column always describe the same entity; rows are added,
// moved and removed in lockstep.

use std::mem::size_of;
use std::ops::Range;
use std::sync::Arc;

use super::bundle::{assert_distinct, ComponentSet};
use super::column::Column;
use super::component::{id_of, Component, ComponentTypeId};
use super::entity::Entity;
use super::signature::Signature;

const ABSENT: u32 = u32::MAX;

/// Component id -> column index table shared by every chunk of one archetype.
#[derive(Debug)]
pub struct ComponentLookup {
    slots: Box<[u32]>,
}

impl ComponentLookup {
    pub fn new(signature: &Signature) -> Self {
        let len = signature
            .types()
            .last()
            .map_or(0, |ty| ty.id() as usize + 1);
        let mut slots = vec![ABSENT; len].into_boxed_slice();
        for (column, ty) in signature.types().iter().enumerate() {
            slots[ty.id() as usize] = column as u32;
        }
        Self { slots }
    }

    /// Column index of `id`, if present.
    #[inline]
    pub fn get(&self, id: ComponentTypeId) -> Option<usize> {
        match self.slots.get(id as usize) {
            Some(&column) if column != ABSENT => Some(column as usize),
            _ => None,
        }
    }

    /// Column index of `id`.
    ///
    /// Asking for a component outside the archetype is a programmer error.
    #[inline]
    pub fn index(&self, id: ComponentTypeId) -> usize {
        match self.get(id) {
            Some(column) => column,
            None => missing_component(id),
        }
    }
}

#[cold]
#[inline(never)]
fn missing_component(id: ComponentTypeId) -> ! {
    panic!("component id {id} is not part of this archetype")
}

/// How many rows fit a byte budget.
///
/// A row is every component of the signature plus its entity handle.
/// Always at least one.
pub fn chunk_capacity(signature: &Signature, chunk_bytes: usize) -> usize {
    let row: usize = signature.types().iter().map(|ty| ty.size()).sum::<usize>()
        + size_of::<Entity>();
    (chunk_bytes / row).max(1)
}

/// A block of struct-of-arrays storage for one archetype.
pub struct Chunk {
    entities: Box<[Entity]>,
    columns: Box<[Column]>,
    lookup: Arc<ComponentLookup>,
    len: usize,
}

impl Chunk {
    pub(crate) fn new(
        signature: &Signature,
        lookup: Arc<ComponentLookup>,
        capacity: usize,
    ) -> Self {
        debug_assert!(capacity > 0);
        let columns = signature
            .types()
            .iter()
            .map(|ty| Column::with_capacity(*ty, capacity))
            .collect();
        Self {
            entities: vec![Entity::NULL; capacity].into_boxed_slice(),
            columns,
            lookup,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Rows still free.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Entities of the occupied rows, indexed by row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities[..self.len]
    }

    #[inline]
    pub fn entity(&self, row: usize) -> Entity {
        self.entities()[row]
    }

    #[inline]
    pub fn lookup(&self) -> &ComponentLookup {
        &self.lookup
    }

    #[inline]
    pub fn has<T: Component>(&self) -> bool {
        self.lookup.get(id_of::<T>()).is_some()
    }

    #[inline]
    pub(crate) fn column_base(&self, column: usize) -> *mut u8 {
        self.columns[column].base()
    }

    /// Column index of each member of `S`.
    #[inline]
    pub fn index_of<S: ComponentSet>(&self) -> S::Indices {
        S::indices(&self.lookup)
    }

    /// Pointer to row 0 of `T`'s column.
    ///
    /// Panics if `T` is not part of the archetype. Dereferencing is only
    /// valid for rows below [`len`](Self::len).
    #[inline]
    pub fn get_first<T: Component>(&self) -> *mut T {
        self.columns[self.lookup.index(id_of::<T>())].base_typed::<T>()
    }

    /// The occupied part of `T`'s column.
    pub fn column<T: Component>(&self) -> &[T] {
        // SAFETY: rows 0..len are initialized and the column outlives `self`.
        unsafe { std::slice::from_raw_parts(self.get_first::<T>(), self.len) }
    }

    /// The occupied part of `T`'s column, mutably.
    pub fn column_mut<T: Component>(&mut self) -> &mut [T] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.get_first::<T>(), self.len) }
    }

    /// Every member column of `S`, zero-copy.
    pub fn columns<S: ComponentSet>(&self) -> S::Slices<'_> {
        let indices = S::indices(&self.lookup);
        // SAFETY: indices came from this chunk's lookup; only shared views.
        unsafe { S::slices(self, indices, self.len) }
    }

    /// Every member column of `S`, mutably and zero-copy.
    pub fn columns_mut<S: ComponentSet>(&mut self) -> S::SlicesMut<'_> {
        let indices = S::indices(&self.lookup);
        assert_distinct(indices.as_ref());
        // SAFETY: distinct columns, exclusive access through `&mut self`.
        unsafe { S::slices_mut(self, indices, self.len) }
    }

    /// Mutable references to every member of `S` in `row`.
    pub fn get<S: ComponentSet>(&mut self, row: usize) -> S::Refs<'_> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let indices = S::indices(&self.lookup);
        assert_distinct(indices.as_ref());
        // SAFETY: bounds and distinctness checked, exclusive borrow.
        unsafe { S::fetch(self, indices, row) }
    }

    /// Unchecked row access for iteration loops.
    ///
    /// # Safety
    /// `indices` must come from [`index_of`](Self::index_of) on a chunk of
    /// the same archetype and be distinct, `row` must be below `len`, and no
    /// other reference to those rows may be live.
    #[inline]
    pub unsafe fn get_unchecked<S: ComponentSet>(
        &self,
        indices: S::Indices,
        row: usize,
    ) -> S::Refs<'_> {
        debug_assert!(row < self.len);
        S::fetch(self, indices, row)
    }

    /// Overwrite every member of `S` in `row`; `None` writes the default.
    pub fn set<S: ComponentSet>(&mut self, row: usize, partial: S::Partial) {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let indices = S::indices(&self.lookup);
        assert_distinct(indices.as_ref());
        // SAFETY: bounds and distinctness checked, exclusive borrow.
        unsafe { S::write(self, indices, row, partial) }
    }

    /// Write one value set into every row of `rows`.
    pub(crate) fn fill<S: ComponentSet>(
        &mut self,
        indices: S::Indices,
        rows: Range<usize>,
        partial: &S::Partial,
    ) {
        assert!(rows.end <= self.len);
        assert_distinct(indices.as_ref());
        // SAFETY: rows are initialized, columns distinct, exclusive borrow.
        unsafe { S::fill(self, indices, rows, partial) }
    }

    /// Append a row initialized with default values.
    pub(crate) fn push(&mut self, entity: Entity) -> usize {
        assert!(!self.is_full(), "chunk is full");
        let row = self.len;
        for column in self.columns.iter_mut() {
            // SAFETY: row < capacity and is currently uninitialized.
            unsafe { column.write_default(row) };
        }
        self.entities[row] = entity;
        self.len += 1;
        row
    }

    /// Append as many of `entities` as fit, returning the rows used.
    pub(crate) fn push_many(&mut self, entities: &[Entity]) -> Range<usize> {
        let take = entities.len().min(self.remaining());
        let start = self.len;
        let end = start + take;
        for column in self.columns.iter_mut() {
            for row in start..end {
                // SAFETY: rows start..end are below capacity and uninitialized.
                unsafe { column.write_default(row) };
            }
        }
        self.entities[start..end].copy_from_slice(&entities[..take]);
        self.len = end;
        start..end
    }

    /// Drop every component in `row`, leaving a hole.
    ///
    /// # Safety
    /// `row < len` must hold live values; the hole must be filled with
    /// [`fill_hole_from_last`](Self::fill_hole_from_last) or
    /// [`fill_hole_from`](Self::fill_hole_from) before anything else.
    pub(crate) unsafe fn drop_row(&mut self, row: usize) {
        debug_assert!(row < self.len);
        for column in self.columns.iter_mut() {
            column.drop_row(row);
        }
    }

    /// Close a hole at `row` with this chunk's last row.
    ///
    /// Returns the entity that moved, if any.
    ///
    /// # Safety
    /// `row` must be a hole left by [`drop_row`](Self::drop_row) or
    /// [`transfer_row`](Self::transfer_row).
    pub(crate) unsafe fn fill_hole_from_last(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        let moved = if row != last {
            for column in self.columns.iter_mut() {
                column.move_within(last, row);
            }
            self.entities[row] = self.entities[last];
            Some(self.entities[row])
        } else {
            None
        };
        self.entities[last] = Entity::NULL;
        self.len = last;
        moved
    }

    /// Close a hole at `row` with the last row of `src`, another chunk of the
    /// same archetype.
    ///
    /// # Safety
    /// As for [`fill_hole_from_last`](Self::fill_hole_from_last); `src` must
    /// share this chunk's signature and be non-empty.
    pub(crate) unsafe fn fill_hole_from(&mut self, row: usize, src: &mut Chunk) -> Entity {
        debug_assert!(row < self.len);
        debug_assert!(!src.is_empty());
        let last = src.len - 1;
        for (dst, from) in self.columns.iter_mut().zip(src.columns.iter()) {
            dst.move_from(row, from, last);
        }
        let moved = src.entities[last];
        self.entities[row] = moved;
        src.entities[last] = Entity::NULL;
        src.len = last;
        moved
    }

    /// Move `row` of `self` into a new row appended to `dst`, a chunk of an
    /// archetype that differs from this one by the single component `T`.
    ///
    /// Shared components move bitwise. When only `dst` has `T`, `added` is
    /// written into the new row; when only `self` has it, the value is moved
    /// out and returned so the caller drops it once bookkeeping is done. No
    /// component code runs here, so the move cannot stop halfway.
    /// Afterwards `row` is a hole in `self`.
    ///
    /// # Safety
    /// `row` must hold live values, the two signatures must differ by `T`
    /// only, and the hole must be filled before `self` is used again.
    pub(crate) unsafe fn transfer_row<T: Component>(
        &mut self,
        row: usize,
        dst: &mut Chunk,
        entity: Entity,
        mut added: Option<T>,
    ) -> (usize, Option<T>) {
        debug_assert!(row < self.len);
        assert!(!dst.is_full(), "chunk is full");
        let id = id_of::<T>();
        let gains = self.lookup.get(id).is_none() && dst.lookup.get(id).is_some();
        assert!(
            !gains || added.is_some(),
            "no value given for added component `{}`",
            std::any::type_name::<T>()
        );
        debug_assert!(dst.columns.iter().all(|column| {
            let other = column.component_type().id();
            other == id || self.lookup.get(other).is_some()
        }));

        let removed = match (self.lookup.get(id), dst.lookup.get(id)) {
            (Some(column), None) => {
                Some(self.columns[column].base_typed::<T>().add(row).read())
            }
            _ => None,
        };
        let dst_row = dst.len;
        for column in dst.columns.iter_mut() {
            match self.lookup.get(column.component_type().id()) {
                Some(src) => column.move_from(dst_row, &self.columns[src], row),
                None => {
                    if let Some(value) = added.take() {
                        column.base_typed::<T>().add(dst_row).write(value);
                    }
                }
            }
        }
        dst.entities[dst_row] = entity;
        dst.len += 1;
        (dst_row, removed)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for column in self.columns.iter_mut() {
            // SAFETY: rows 0..len are initialized.
            unsafe { column.drop_rows(self.len) };
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("columns", &self.columns.len())
            .finish()
    }
}
