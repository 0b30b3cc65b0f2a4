//! Archetype-based entity component storage.
//!
//! Entities with the same set of component types share an archetype, and an
//! archetype stores its entities in fixed-size chunks: one densely packed
//! column per component type plus a column of entity handles. The world maps
//! entity handles to `(archetype, chunk, row)` and keeps that map exact
//! through every create, destroy and structural change.

mod archetype;
mod bitset;
mod bundle;
mod chunk;
mod column;
mod component;
mod dispatch;
mod entity;
mod entity_info;
mod events;
mod query;
mod signature;
mod world;

pub use archetype::{Archetype, ArchetypeId, Slot};
pub use bitset::BitSet;
pub use bundle::{signature_of, ComponentSet, SetInfo};
pub use chunk::{chunk_capacity, Chunk, ComponentLookup};
pub use component::{
    component_type, component_type_by_id, id_of, registered_count, Component, ComponentType,
    ComponentTypeId,
};
pub use dispatch::{ChunkDispatcher, ChunkJob, InlineDispatcher, RayonDispatcher};
pub use entity::{Entity, WorldId};
pub use entity_info::{EntityInfo, EntityInfoStorage};
pub use events::EntityEvents;
pub use query::QueryDescription;
pub use signature::{Signature, SignatureError};
pub use world::{World, WorldError};
