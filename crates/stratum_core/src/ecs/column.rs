// column.rs - Fixed-capacity, type-erased component column
//
// A column is one contiguous, correctly aligned allocation holding up to
// `capacity` values of a single component type. It never reallocates, so
// base pointers handed out stay valid for the column's lifetime. The owning
// chunk tracks how many rows are initialized; the column itself only knows
// how to address, initialize, move and drop individual rows.

use crate::ecs::ComponentType;
use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

pub(crate) struct Column {
    data: NonNull<u8>,
    ty: ComponentType,
    capacity: usize,
}

// SAFETY: every component type is `Send + Sync` (see `Component`), and the
// column owns its allocation exclusively.
unsafe impl Send for Column {}
// SAFETY: see above; shared access only hands out `*const`/`&` views.
unsafe impl Sync for Column {}

impl Column {
    /// Allocate room for `capacity` values of `ty`.
    ///
    /// Allocation failure is fatal.
    pub fn with_capacity(ty: ComponentType, capacity: usize) -> Self {
        let layout = Self::array_layout(&ty, capacity);
        let data = if layout.size() == 0 {
            dangling(ty.align())
        } else {
            // SAFETY: layout has a non-zero size.
            let raw = unsafe { alloc::alloc(layout) };
            NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };
        Self { data, ty, capacity }
    }

    fn array_layout(ty: &ComponentType, capacity: usize) -> Layout {
        ty.size()
            .checked_mul(capacity)
            .and_then(|bytes| Layout::from_size_align(bytes, ty.align()).ok())
            .unwrap_or_else(|| {
                panic!(
                    "column layout overflow for `{}` x {}",
                    ty.name(),
                    capacity
                )
            })
    }

    #[inline]
    pub fn component_type(&self) -> &ComponentType {
        &self.ty
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Base pointer of the column.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Typed base pointer.
    ///
    /// Debug builds verify that `T` is the column's component type.
    #[inline]
    pub fn base_typed<T: 'static>(&self) -> *mut T {
        debug_assert!(
            self.ty.is::<T>(),
            "column holds `{}`, not `{}`",
            self.ty.name(),
            std::any::type_name::<T>()
        );
        self.data.as_ptr().cast::<T>()
    }

    /// Address of `row`.
    ///
    /// # Safety
    /// `row` must be below `capacity`.
    #[inline]
    pub unsafe fn row_ptr(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.capacity);
        self.data.as_ptr().add(row * self.ty.size())
    }

    /// Write `T::default()` into an uninitialized row.
    ///
    /// # Safety
    /// `row < capacity` and the row must not hold a live value.
    #[inline]
    pub unsafe fn write_default(&mut self, row: usize) {
        (self.ty.default_fn())(self.row_ptr(row));
    }

    /// Drop the value in `row`, leaving it uninitialized.
    ///
    /// # Safety
    /// `row < capacity` and the row must hold a live value.
    #[inline]
    pub unsafe fn drop_row(&mut self, row: usize) {
        if let Some(drop_fn) = self.ty.drop_fn() {
            drop_fn(self.row_ptr(row));
        }
    }

    /// Drop rows `0..len`.
    ///
    /// # Safety
    /// Rows `0..len` must hold live values.
    pub unsafe fn drop_rows(&mut self, len: usize) {
        if let Some(drop_fn) = self.ty.drop_fn() {
            for row in 0..len {
                drop_fn(self.row_ptr(row));
            }
        }
    }

    /// Bitwise-move `from` into `to` within this column.
    ///
    /// # Safety
    /// `from` must hold a live value, `to` must be uninitialized, and the two
    /// rows must differ. Afterwards `from` is logically uninitialized.
    #[inline]
    pub unsafe fn move_within(&mut self, from: usize, to: usize) {
        debug_assert_ne!(from, to);
        ptr::copy_nonoverlapping(self.row_ptr(from), self.row_ptr(to), self.ty.size());
    }

    /// Bitwise-move `src[src_row]` into `self[dst_row]`.
    ///
    /// # Safety
    /// Both columns must hold the same component type, `src_row` must hold a
    /// live value and `dst_row` must be uninitialized. Afterwards `src_row`
    /// is logically uninitialized.
    #[inline]
    pub unsafe fn move_from(&mut self, dst_row: usize, src: &Column, src_row: usize) {
        debug_assert_eq!(self.ty, src.ty);
        ptr::copy_nonoverlapping(src.row_ptr(src_row), self.row_ptr(dst_row), self.ty.size());
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        let layout = Self::array_layout(&self.ty, self.capacity);
        if layout.size() != 0 {
            // SAFETY: allocated in `with_capacity` with this exact layout.
            unsafe { alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

/// Well-aligned dangling pointer for zero-sized columns.
fn dangling(align: usize) -> NonNull<u8> {
    // Alignment is always a non-zero power of two.
    NonNull::new(align as *mut u8).unwrap_or(NonNull::dangling())
}
