//! Reusable scratch buffers.

mod scratch;

pub use scratch::{Scratch, ScratchPool};
