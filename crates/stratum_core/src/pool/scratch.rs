use std::ops::{Deref, DerefMut};

/// Free list of buffers rented out for the duration of one operation.
///
/// Bulk paths need temporary arrays sized to the batch. Renting from a pool
/// keeps repeated batches from hitting the allocator once the largest batch
/// size has been seen.
#[derive(Debug, Default)]
pub struct ScratchPool<T> {
    free: Vec<Vec<T>>,
}

impl<T: Clone + Default> ScratchPool<T> {
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Rent a buffer of exactly `len` default values.
    ///
    /// The buffer goes back to the pool when the guard is dropped.
    pub fn rent(&mut self, len: usize) -> Scratch<'_, T> {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.resize(len, T::default());
        Scratch { pool: self, buf }
    }

    /// Buffers currently idle in the pool.
    #[inline]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Drop every idle buffer.
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

/// A buffer borrowed from a [`ScratchPool`].
pub struct Scratch<'p, T> {
    pool: &'p mut ScratchPool<T>,
    buf: Vec<T>,
}

impl<T> Deref for Scratch<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buf
    }
}

impl<T> DerefMut for Scratch<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buf
    }
}

impl<T> Drop for Scratch<'_, T> {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.pool.free.push(buf);
    }
}
