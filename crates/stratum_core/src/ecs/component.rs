// component.rs - Process-wide component type registry
//
// Every distinct Rust type used as a component receives a small, stable id
// the first time it is seen. The registry is append-only: ids are never
// reclaimed and live for the rest of the process.

use once_cell::sync::Lazy;
use std::any::{type_name, TypeId};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::{align_of, needs_drop, size_of};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

pub type ComponentTypeId = u32;

/// Trait for types that can be stored in a chunk column.
///
/// Implemented for every `Default + Clone + Send + Sync + 'static` type.
/// `Default` backs the "absent value resets the column" behaviour of partial
/// writes, `Clone` backs range fills during bulk creation.
pub trait Component: Default + Clone + Send + Sync + 'static {}

impl<T: Default + Clone + Send + Sync + 'static> Component for T {}

/// Runtime description of a registered component type.
///
/// Identity is the id alone: two `ComponentType` values with the same id
/// describe the same Rust type.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: ComponentTypeId,
    size: usize,
    align: usize,
    name: &'static str,
    type_id: TypeId,
    drop_fn: Option<unsafe fn(*mut u8)>,
    default_fn: unsafe fn(*mut u8),
}

impl ComponentType {
    #[inline]
    pub fn id(&self) -> ComponentTypeId {
        self.id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Rust type name, used for diagnostics only.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether this describes the Rust type `T`.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    #[inline]
    pub(crate) fn drop_fn(&self) -> Option<unsafe fn(*mut u8)> {
        self.drop_fn
    }

    #[inline]
    pub(crate) fn default_fn(&self) -> unsafe fn(*mut u8) {
        self.default_fn
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ComponentType {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentType {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

unsafe fn drop_erased<T>(ptr: *mut u8) {
    ptr::drop_in_place(ptr.cast::<T>());
}

unsafe fn write_default_erased<T: Default>(ptr: *mut u8) {
    ptr::write(ptr.cast::<T>(), T::default());
}

struct Registry {
    by_type: HashMap<TypeId, ComponentType>,
    by_id: Vec<ComponentType>,
}

/// Global registry keyed by Rust `TypeId`.
static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| {
    RwLock::new(Registry {
        by_type: HashMap::new(),
        by_id: Vec::new(),
    })
});

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Look up (registering on first use) the runtime type of `T`.
///
/// Safe under concurrent first use from many threads: the id counter is only
/// advanced while holding the registry write lock, after re-checking that no
/// other thread registered `T` in the meantime.
pub fn component_type<T: Component>() -> ComponentType {
    let key = TypeId::of::<T>();
    if let Some(ty) = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_type
        .get(&key)
    {
        return *ty;
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(ty) = registry.by_type.get(&key) {
        return *ty;
    }

    let ty = ComponentType {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        size: size_of::<T>(),
        align: align_of::<T>(),
        name: type_name::<T>(),
        type_id: key,
        drop_fn: if needs_drop::<T>() {
            Some(drop_erased::<T> as unsafe fn(*mut u8))
        } else {
            None
        },
        default_fn: write_default_erased::<T>,
    };
    debug_assert_eq!(registry.by_id.len(), ty.id as usize);
    registry.by_type.insert(key, ty);
    registry.by_id.push(ty);
    tracing::trace!(id = ty.id, name = ty.name, size = ty.size, "registered component type");
    ty
}

/// Stable id of `T`, registering it on first use.
#[inline]
pub fn id_of<T: Component>() -> ComponentTypeId {
    component_type::<T>().id
}

/// Look up a registered component type by id.
pub fn component_type_by_id(id: ComponentTypeId) -> Option<ComponentType> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_id
        .get(id as usize)
        .copied()
}

/// Number of component types registered so far in this process.
pub fn registered_count() -> usize {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_id
        .len()
}
