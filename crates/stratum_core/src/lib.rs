//! Stratum Core
//!
//! Archetype/chunk storage for an entity component system:
//! - Component type registry and order-independent signatures
//! - Chunked struct-of-arrays storage with swap-compaction
//! - Typed single-entity, bulk and parallel access
//! - World configuration

pub mod config;
pub mod ecs;
pub mod pool;

pub use config::{ConfigError, DispatchMode, WorldConfig};
pub use ecs::{Entity, QueryDescription, World, WorldError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
