//! Component sets: the typed bridge between tuples and chunk columns.
//!
//! Every tuple `(T0, ..., Tn)` of components with arity 1 through 25 is a
//! [`ComponentSet`]. The impls are generated by one macro, so the logic for
//! resolving column indices, fetching rows, writing values and filling
//! ranges exists once and only the tuple width changes.

use std::any::TypeId;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;

use super::chunk::{Chunk, ComponentLookup};
use super::component::{component_type, id_of, Component, ComponentType};
use super::signature::Signature;

mod sealed {
    pub trait Sealed {}
}

/// Memoized description of one component set.
#[derive(Debug)]
pub struct SetInfo {
    signature: Signature,
    declared: Box<[ComponentType]>,
}

impl SetInfo {
    /// Canonical, order-independent signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Component types in declaration order; events fire in this order.
    #[inline]
    pub fn declared(&self) -> &[ComponentType] {
        &self.declared
    }
}

static SET_INFOS: Lazy<RwLock<HashMap<TypeId, &'static SetInfo>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn set_info_for<S: ComponentSet>() -> &'static SetInfo {
    let key = TypeId::of::<S>();
    if let Some(info) = SET_INFOS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return info;
    }

    // Built outside the lock so a rejected set cannot poison it.
    let declared = S::component_types();
    let signature = Signature::try_new(declared.iter().copied())
        .unwrap_or_else(|err| panic!("invalid component set: {err}"));

    let mut infos = SET_INFOS.write().unwrap_or_else(PoisonError::into_inner);
    infos.entry(key).or_insert_with(|| {
        // Lives for the rest of the process, like the type registry.
        Box::leak(Box::new(SetInfo {
            signature,
            declared: declared.into_boxed_slice(),
        }))
    })
}

/// Canonical signature of the component set `S`, built once per set.
#[inline]
pub fn signature_of<S: ComponentSet>() -> &'static Signature {
    S::info().signature()
}

/// A statically typed set of distinct components.
///
/// Implemented for tuples of arity 1 through 25. The unsafe methods are the
/// raw row accessors used by [`Chunk`]; they assume the chunk contains every
/// member of the set, that `indices` came from that chunk's lookup, and that
/// rows are within the chunk's initialized length.
pub trait ComponentSet: sealed::Sealed + Send + Sync + Sized + 'static {
    /// One `Option<T>` per member; `None` writes `T::default()`.
    type Partial;
    /// One `&mut T` per member.
    type Refs<'a>;
    /// One `&[T]` column per member.
    type Slices<'a>;
    /// One `&mut [T]` column per member.
    type SlicesMut<'a>;
    /// Column index of each member inside a chunk.
    type Indices: Copy + AsRef<[usize]>;

    const LEN: usize;

    /// Runtime types in declaration order.
    fn component_types() -> Vec<ComponentType>;

    /// Memoized signature and declaration order.
    ///
    /// Panics the first time a set that repeats a type is used.
    fn info() -> &'static SetInfo {
        set_info_for::<Self>()
    }

    /// Every member present.
    fn into_partial(self) -> Self::Partial;

    /// Resolve each member's column through `lookup`.
    ///
    /// Panics if a member is not part of the lookup's archetype.
    fn indices(lookup: &ComponentLookup) -> Self::Indices;

    #[doc(hidden)]
    unsafe fn fetch<'a>(chunk: &'a Chunk, indices: Self::Indices, row: usize) -> Self::Refs<'a>;

    #[doc(hidden)]
    unsafe fn write(chunk: &Chunk, indices: Self::Indices, row: usize, partial: Self::Partial);

    #[doc(hidden)]
    unsafe fn fill(
        chunk: &Chunk,
        indices: Self::Indices,
        rows: Range<usize>,
        partial: &Self::Partial,
    );

    #[doc(hidden)]
    unsafe fn slices<'a>(chunk: &'a Chunk, indices: Self::Indices, len: usize)
        -> Self::Slices<'a>;

    #[doc(hidden)]
    unsafe fn slices_mut<'a>(
        chunk: &'a Chunk,
        indices: Self::Indices,
        len: usize,
    ) -> Self::SlicesMut<'a>;
}

/// Panic if two members resolved to the same column.
///
/// Handing out two `&mut` to one column would alias, so the safe accessors
/// check this before touching memory.
#[inline]
pub(crate) fn assert_distinct(indices: &[usize]) {
    for (n, index) in indices.iter().enumerate() {
        if indices[n + 1..].contains(index) {
            panic!("component set resolves column {index} more than once");
        }
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_component_set {
    ($($T:ident $v:ident $i:ident),+) => {
        impl<$($T: Component),+> sealed::Sealed for ($($T,)+) {}

        impl<$($T: Component),+> ComponentSet for ($($T,)+) {
            type Partial = ($(Option<$T>,)+);
            type Refs<'a> = ($(&'a mut $T,)+);
            type Slices<'a> = ($(&'a [$T],)+);
            type SlicesMut<'a> = ($(&'a mut [$T],)+);
            type Indices = [usize; count!($($T)+)];

            const LEN: usize = count!($($T)+);

            fn component_types() -> Vec<ComponentType> {
                vec![$(component_type::<$T>()),+]
            }

            #[inline]
            fn into_partial(self) -> Self::Partial {
                let ($($v,)+) = self;
                ($(Some($v),)+)
            }

            #[inline]
            fn indices(lookup: &ComponentLookup) -> Self::Indices {
                [$(lookup.index(id_of::<$T>())),+]
            }

            #[inline]
            unsafe fn fetch<'a>(
                chunk: &'a Chunk,
                indices: Self::Indices,
                row: usize,
            ) -> Self::Refs<'a> {
                let [$($i),+] = indices;
                ($(&mut *chunk.column_base($i).cast::<$T>().add(row),)+)
            }

            #[inline]
            unsafe fn write(
                chunk: &Chunk,
                indices: Self::Indices,
                row: usize,
                partial: Self::Partial,
            ) {
                let [$($i),+] = indices;
                let ($($v,)+) = partial;
                $(
                    *chunk.column_base($i).cast::<$T>().add(row) = $v.unwrap_or_default();
                )+
            }

            unsafe fn fill(
                chunk: &Chunk,
                indices: Self::Indices,
                rows: Range<usize>,
                partial: &Self::Partial,
            ) {
                let [$($i),+] = indices;
                let ($($v,)+) = partial;
                $(
                    let base = chunk.column_base($i).cast::<$T>();
                    match $v {
                        Some(value) => {
                            for row in rows.clone() {
                                *base.add(row) = value.clone();
                            }
                        }
                        None => {
                            for row in rows.clone() {
                                *base.add(row) = <$T>::default();
                            }
                        }
                    }
                )+
            }

            #[inline]
            unsafe fn slices<'a>(
                chunk: &'a Chunk,
                indices: Self::Indices,
                len: usize,
            ) -> Self::Slices<'a> {
                let [$($i),+] = indices;
                ($(std::slice::from_raw_parts(chunk.column_base($i).cast::<$T>(), len),)+)
            }

            #[inline]
            unsafe fn slices_mut<'a>(
                chunk: &'a Chunk,
                indices: Self::Indices,
                len: usize,
            ) -> Self::SlicesMut<'a> {
                let [$($i),+] = indices;
                ($(std::slice::from_raw_parts_mut(chunk.column_base($i).cast::<$T>(), len),)+)
            }
        }
    };
}

// One impl per suffix of the list: arities 25 down to 1.
macro_rules! impl_component_sets {
    ($T:ident $v:ident $i:ident) => {
        impl_component_set!($T $v $i);
    };
    ($T:ident $v:ident $i:ident, $($rest:tt)*) => {
        impl_component_set!($T $v $i, $($rest)*);
        impl_component_sets!($($rest)*);
    };
}

impl_component_sets!(
    T0 v0 i0, T1 v1 i1, T2 v2 i2, T3 v3 i3, T4 v4 i4,
    T5 v5 i5, T6 v6 i6, T7 v7 i7, T8 v8 i8, T9 v9 i9,
    T10 v10 i10, T11 v11 i11, T12 v12 i12, T13 v13 i13, T14 v14 i14,
    T15 v15 i15, T16 v16 i16, T17 v17 i17, T18 v18 i18, T19 v19 i19,
    T20 v20 i20, T21 v21 i21, T22 v22 i22, T23 v23 i23, T24 v24 i24
);
