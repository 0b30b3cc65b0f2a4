//! Chunk dispatchers.
//!
//! The world hands a query's matching chunks to a [`ChunkDispatcher`] as one
//! batch of independent jobs. Chunks never overlap, so a dispatcher may run
//! the job on any number of them concurrently.

use rayon::prelude::*;

use crate::ecs::Chunk;

/// Job executed once per chunk.
pub type ChunkJob<'a> = dyn Fn(&mut Chunk) + Sync + 'a;

/// Runs a chunk job over a batch of chunks.
pub trait ChunkDispatcher: Send + Sync {
    fn dispatch(&self, chunks: &mut [&mut Chunk], job: &ChunkJob<'_>);

    fn name(&self) -> &'static str;
}

/// Spreads chunks across the rayon global pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayonDispatcher;

impl ChunkDispatcher for RayonDispatcher {
    fn dispatch(&self, chunks: &mut [&mut Chunk], job: &ChunkJob<'_>) {
        chunks.par_iter_mut().for_each(|chunk| job(chunk));
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Runs every chunk on the calling thread, in order.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl ChunkDispatcher for InlineDispatcher {
    fn dispatch(&self, chunks: &mut [&mut Chunk], job: &ChunkJob<'_>) {
        for chunk in chunks.iter_mut() {
            job(chunk);
        }
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}
