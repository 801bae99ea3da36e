//! Interfaces to the host which owns the grid, its chunk metadata, and its threads.
//!
//! All of these may be called from any thread.

use chunk_data::{
    ChunkPos,
    Position,
};
use std::{
    sync::Arc,
    time::Duration,
};
use vek::*;
use anyhow::Result;


/// Live state of a grid cell, as far as being marked is concerned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellState {
    /// Nothing is there (air). A marked position whose cell is empty is stale.
    Empty,
    /// Something is there.
    Occupied,
}

/// The live grid.
pub trait Grid: Send + Sync {
    /// Names of all worlds currently known to the host.
    fn worlds(&self) -> Vec<Arc<str>>;

    /// Chunk coordinates of all currently loaded chunks in a world.
    fn loaded_chunks(&self, world: &str) -> Vec<Vec2<i32>>;

    /// Live state of a cell, or `None` if its world can't currently be resolved.
    fn cell_state(&self, pos: &Position) -> Option<CellState>;
}

/// Per-chunk metadata store.
///
/// The store is shared with unrelated host data. Only the single key passed in is ever read or
/// written, and other writers of that key are not assumed to be absent.
pub trait ChunkMetadata: Send + Sync {
    fn read(&self, chunk: &ChunkPos, key: &str) -> Result<Option<String>>;

    fn write(&self, chunk: &ChunkPos, key: &str, value: &str) -> Result<()>;

    fn remove(&self, chunk: &ChunkPos, key: &str) -> Result<()>;
}

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Hint for where a task should run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Anywhere.
    Any,
    /// Wherever the host runs work touching this chunk.
    Chunk(ChunkPos),
}

/// Capability to run work later.
pub trait Scheduler: Send + Sync {
    /// Run `task` no sooner than `delay` from now, honoring `affinity`. Must not run the task
    /// synchronously within this call.
    fn submit(&self, task: Task, delay: Duration, affinity: Affinity);
}


/// Bundle of host capabilities injected into the service.
#[derive(Clone)]
pub struct Host {
    pub grid: Arc<dyn Grid>,
    pub metadata: Arc<dyn ChunkMetadata>,
    pub scheduler: Arc<dyn Scheduler>,
}
