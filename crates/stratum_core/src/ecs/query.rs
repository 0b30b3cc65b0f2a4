//! Archetype filters.
//!
//! A [`QueryDescription`] selects archetypes by component membership. It is
//! matched against signature bits, never against individual entities, so a
//! query touches each archetype at most once.

use crate::ecs::{BitSet, ComponentSet, ComponentTypeId, Signature};

/// Which archetypes a query visits.
///
/// - `all`: every listed component must be present
/// - `any`: at least one listed component must be present (ignored if empty)
/// - `none`: no listed component may be present
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryDescription {
    all: BitSet,
    any: BitSet,
    none: BitSet,
}

impl QueryDescription {
    /// Matches every archetype.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every member of `S`.
    pub fn with_all<S: ComponentSet>(mut self) -> Self {
        Self::extend(&mut self.all, S::info().signature());
        self
    }

    /// Require at least one member of `S`.
    pub fn with_any<S: ComponentSet>(mut self) -> Self {
        Self::extend(&mut self.any, S::info().signature());
        self
    }

    /// Exclude archetypes holding any member of `S`.
    pub fn with_none<S: ComponentSet>(mut self) -> Self {
        Self::extend(&mut self.none, S::info().signature());
        self
    }

    /// Require a component by runtime id.
    pub fn with_all_id(mut self, id: ComponentTypeId) -> Self {
        self.all.insert(id);
        self
    }

    /// Exclude a component by runtime id.
    pub fn with_none_id(mut self, id: ComponentTypeId) -> Self {
        self.none.insert(id);
        self
    }

    fn extend(bits: &mut BitSet, signature: &Signature) {
        for ty in signature.types() {
            bits.insert(ty.id());
        }
    }

    #[inline]
    pub fn all(&self) -> &BitSet {
        &self.all
    }

    #[inline]
    pub fn any(&self) -> &BitSet {
        &self.any
    }

    #[inline]
    pub fn none(&self) -> &BitSet {
        &self.none
    }

    /// Whether an archetype with component bits `bits` is selected.
    #[inline]
    pub fn matches(&self, bits: &BitSet) -> bool {
        bits.contains_all(&self.all)
            && (self.any.is_empty() || bits.intersects(&self.any))
            && !bits.intersects(&self.none)
    }

    #[inline]
    pub fn matches_signature(&self, signature: &Signature) -> bool {
        self.matches(signature.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct A;
    #[derive(Clone, Default)]
    struct B(#[allow(dead_code)] u8);
    #[derive(Clone, Default)]
    struct C(#[allow(dead_code)] u16);

    fn sig<S: ComponentSet>() -> Signature {
        S::info().signature().clone()
    }

    #[test]
    fn test_empty_description_matches_everything() {
        let query = QueryDescription::new();
        assert!(query.matches_signature(&Signature::empty()));
        assert!(query.matches_signature(&sig::<(A, B)>()));
    }

    #[test]
    fn test_all_any_none() {
        let query = QueryDescription::new()
            .with_all::<(A,)>()
            .with_any::<(B, C)>()
            .with_none::<(C,)>();

        assert!(query.matches_signature(&sig::<(A, B)>()));
        assert!(!query.matches_signature(&sig::<(A,)>()));
        assert!(!query.matches_signature(&sig::<(A, B, C)>()));
        assert!(!query.matches_signature(&sig::<(B,)>()));
    }

    #[test]
    fn test_runtime_ids() {
        let b = crate::ecs::id_of::<B>();
        let query = QueryDescription::new().with_all_id(b);
        assert!(query.matches_signature(&sig::<(A, B)>()));
        assert!(!query.matches_signature(&sig::<(A, C)>()));

        let query = QueryDescription::new().with_none_id(b);
        assert!(query.matches_signature(&sig::<(A, C)>()));
    }
}
