//! Lifecycle hooks.
//!
//! The world calls these synchronously after each operation's data writes
//! are complete. Per-component callbacks fire in the order the component
//! set was declared.

use crate::ecs::{ComponentType, Entity};

/// Receiver for entity lifecycle notifications. Every method defaults to a
/// no-op; implement only the ones you need.
pub trait EntityEvents: Send + Sync {
    fn on_entity_created(&self, _entity: Entity) {}

    fn on_component_added(&self, _entity: Entity, _component: &ComponentType) {}

    fn on_component_set(&self, _entity: Entity, _component: &ComponentType) {}

    fn on_component_removed(&self, _entity: Entity, _component: &ComponentType) {}

    /// Fired while the entity's row is still in place.
    fn on_entity_destroyed(&self, _entity: Entity) {}
}
