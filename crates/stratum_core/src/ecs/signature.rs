// signature.rs - Order-independent identity of a component type set
//
// A signature is the key under which the world finds or creates an
// archetype. Component types are kept sorted by id so that {A, B} and
// {B, A} produce the same signature and the same cached hash.

use crate::ecs::{BitSet, ComponentType, ComponentTypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("component `{name}` appears more than once in one component set")]
    DuplicateComponent { name: &'static str },
}

struct SignatureData {
    types: Box<[ComponentType]>,
    bits: BitSet,
    hash: u64,
}

/// Immutable, cheaply clonable set of component types.
#[derive(Clone)]
pub struct Signature {
    data: Arc<SignatureData>,
}

impl Signature {
    /// The signature of an entity without components.
    pub fn empty() -> Self {
        Self::from_sorted(Vec::new())
    }

    /// Build a signature from component types in any order.
    ///
    /// Repeating a type is rejected rather than collapsed.
    pub fn try_new(
        types: impl IntoIterator<Item = ComponentType>,
    ) -> Result<Self, SignatureError> {
        let mut types: Vec<ComponentType> = types.into_iter().collect();
        types.sort_unstable();
        if let Some(pair) = types.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SignatureError::DuplicateComponent {
                name: pair[0].name(),
            });
        }
        Ok(Self::from_sorted(types))
    }

    fn from_sorted(types: Vec<ComponentType>) -> Self {
        let hash = hash_components(&types);
        let bits = BitSet::from_ids(types.iter().map(ComponentType::id));
        Self {
            data: Arc::new(SignatureData {
                types: types.into_boxed_slice(),
                bits,
                hash,
            }),
        }
    }

    /// Component types sorted by id.
    #[inline]
    pub fn types(&self) -> &[ComponentType] {
        &self.data.types
    }

    #[inline]
    pub fn bits(&self) -> &BitSet {
        &self.data.bits
    }

    /// Cached hash of the sorted id list.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.data.hash
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.types.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.types.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.data.bits.contains(id)
    }

    /// True if every component of `other` is part of `self`.
    #[inline]
    pub fn contains_all(&self, other: &Signature) -> bool {
        self.data.bits.contains_all(&other.data.bits)
    }

    /// Signature with `ty` added.
    pub fn with(&self, ty: ComponentType) -> Result<Self, SignatureError> {
        if self.contains(ty.id()) {
            return Err(SignatureError::DuplicateComponent { name: ty.name() });
        }
        let mut types = self.data.types.to_vec();
        let at = types.partition_point(|t| t.id() < ty.id());
        types.insert(at, ty);
        Ok(Self::from_sorted(types))
    }

    /// Signature with `ty` removed. Removing an absent type is a no-op.
    pub fn without(&self, ty: ComponentType) -> Self {
        if !self.contains(ty.id()) {
            return self.clone();
        }
        let types = self
            .data
            .types
            .iter()
            .copied()
            .filter(|t| *t != ty)
            .collect();
        Self::from_sorted(types)
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            || (self.data.hash == other.data.hash && self.data.types == other.data.types)
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.data.hash);
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.data.types.iter().map(ComponentType::name))
            .finish()
    }
}

/// Compute a stable hash for a sorted list of component types.
fn hash_components(types: &[ComponentType]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for ty in types {
        ty.id().hash(&mut hasher);
    }
    hasher.finish()
}
