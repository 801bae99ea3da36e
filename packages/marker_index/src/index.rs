//! See `TieredIndex`.

use chunk_data::{
    ChunkGrid,
    ChunkKey,
    ChunkPos,
    Position,
    PositionKey,
    WorldId,
    Worlds,
};
use std::{
    collections::HashSet,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};
use dashmap::{
    mapref::entry::Entry,
    DashMap,
    DashSet,
};
use serde::Serialize;


/// Three-tier membership index of marked positions.
///
/// The tiers are:
///
/// 1. `global`: every marked position key. A position is marked iff it's in here.
/// 2. `by_chunk`: for each chunk with at least one marked position, the set of its marked
///    position keys. Never contains an empty set.
/// 3. `world_chunks`: for each world with at least one marked position, the number of chunks in
///    that world which have a `by_chunk` bucket.
///
/// All tiers are sharded concurrent containers, so unrelated chunks never contend. Every
/// mutation of a chunk's members happens while holding that chunk's `by_chunk` entry, and
/// touches the tiers in an order such that a concurrent reader may observe a superset of true
/// membership but never a subset. That is, at every instant:
///
/// ```text
/// marked(p) => chunk_has_members(chunk_of(p)) => world_has_members(world_of(p))
/// ```
///
/// Lock order is always `by_chunk` entry, then `world_chunks` or `global`. Nothing locks
/// `by_chunk` while holding another tier.
#[derive(Debug)]
pub struct TieredIndex {
    worlds: Worlds,
    grid: ChunkGrid,
    global: DashSet<PositionKey>,
    by_chunk: DashMap<ChunkKey, HashSet<PositionKey>>,
    world_chunks: DashMap<WorldId, usize>,
    counters: Counters,
}

// diagnostic counters, no behavioral effect
#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sweep_removed: AtomicU64,
}

/// Snapshot of index size and diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_members: usize,
    pub total_chunks: usize,
    pub total_worlds: usize,
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    /// Hits as a percentage of lookups, or 0 if there were no lookups.
    pub hit_rate: f64,
    pub sweep_removed: u64,
}

impl TieredIndex {
    /// Construct empty.
    pub fn new(grid: ChunkGrid) -> Self {
        TieredIndex {
            worlds: Worlds::new(),
            grid,
            global: DashSet::new(),
            by_chunk: DashMap::new(),
            world_chunks: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// The world interner keys are relative to.
    pub fn worlds(&self) -> &Worlds {
        &self.worlds
    }

    /// The chunk partitioning buckets are relative to.
    pub fn grid(&self) -> ChunkGrid {
        self.grid
    }

    /// Mark a position. Returns whether it was not already marked.
    pub fn register(&self, pos: &Position) -> bool {
        let key = self.worlds.encode(pos);
        let chunk = self.grid.chunk_key_of(key);
        let newly = match self.by_chunk.entry(chunk) {
            Entry::Occupied(mut bucket) => {
                bucket.get_mut().insert(key);
                self.global.insert(key)
            }
            Entry::Vacant(vacant) => {
                // world flag, then bucket, then global
                *self.world_chunks.entry(chunk.world).or_insert(0) += 1;
                let bucket = vacant.insert(HashSet::from([key]));
                let newly = self.global.insert(key);
                drop(bucket);
                newly
            }
        };
        if newly {
            trace!(%pos, "registered");
        }
        newly
    }

    /// Unmark a position. Returns whether it was marked.
    pub fn unregister(&self, pos: &Position) -> bool {
        let key = match self.worlds.try_encode(pos) {
            Some(key) => key,
            None => return false,
        };
        let removed = self.unregister_key(key);
        if removed {
            trace!(%pos, "unregistered");
        }
        removed
    }

    fn unregister_key(&self, key: PositionKey) -> bool {
        let chunk = self.grid.chunk_key_of(key);
        let mut bucket = match self.by_chunk.entry(chunk) {
            Entry::Occupied(bucket) => bucket,
            Entry::Vacant(_) => return false,
        };
        // global, then bucket, then world flag
        let removed = self.global.remove(&key).is_some();
        bucket.get_mut().remove(&key);
        if bucket.get().is_empty() {
            bucket.remove();
            self.decr_world_chunks(chunk.world);
        }
        removed
    }

    // called with the emptied bucket's entry already removed
    fn decr_world_chunks(&self, world: WorldId) {
        if let Entry::Occupied(mut count) = self.world_chunks.entry(world) {
            *count.get_mut() -= 1;
            if *count.get() == 0 {
                count.remove();
            }
        } else {
            debug_assert!(false, "world chunk count missing for non-empty bucket");
        }
    }

    /// Whether a position is marked. The authoritative check.
    pub fn is_marked(&self, pos: &Position) -> bool {
        match self.worlds.try_encode(pos) {
            Some(key) => self.is_marked_key(key),
            None => {
                self.count_lookup(false);
                false
            }
        }
    }

    /// Like `is_marked`, for callers that already have the key.
    pub fn is_marked_key(&self, key: PositionKey) -> bool {
        let hit = self.global.contains(&key);
        self.count_lookup(hit);
        hit
    }

    fn count_lookup(&self, hit: bool) {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether a chunk has at least one marked position.
    pub fn chunk_has_members(&self, chunk: &ChunkPos) -> bool {
        self.worlds
            .lookup(&chunk.world)
            .map(|world| self.chunk_has_members_key(ChunkKey { world, cc: chunk.cc }))
            .unwrap_or(false)
    }

    /// Like `chunk_has_members`, for callers that already have the key.
    pub fn chunk_has_members_key(&self, chunk: ChunkKey) -> bool {
        self.by_chunk.contains_key(&chunk)
    }

    /// Whether a world has at least one marked position.
    pub fn world_has_members(&self, world: &str) -> bool {
        self.worlds
            .lookup(world)
            .map(|world| self.world_has_members_id(world))
            .unwrap_or(false)
    }

    /// Like `world_has_members`, for callers that already have the id.
    pub fn world_has_members_id(&self, world: WorldId) -> bool {
        self.world_chunks.contains_key(&world)
    }

    /// Snapshot of the marked positions in a chunk.
    pub fn members_of_chunk(&self, chunk: &ChunkPos) -> HashSet<Position> {
        let keys = self.worlds
            .lookup(&chunk.world)
            .and_then(|world| self.by_chunk.get(&ChunkKey { world, cc: chunk.cc }))
            .map(|bucket| bucket.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        self.decode_all(keys)
    }

    /// Snapshot of every marked position.
    ///
    /// Taken one shard at a time, so it's consistent per shard but not globally. Safe to call
    /// while other threads mutate the index.
    pub fn snapshot(&self) -> Vec<Position> {
        let keys = self.global.iter().map(|key| *key).collect::<Vec<_>>();
        self.decode_all(keys).into_iter().collect()
    }

    fn decode_all(&self, keys: Vec<PositionKey>) -> HashSet<Position> {
        keys
            .into_iter()
            .filter_map(|key| self.worlds
                .decode(key)
                .map_err(|e| error!(%e, "index holds undecodable key"))
                .ok())
            .collect()
    }

    /// Number of marked positions.
    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    /// Unmark everything.
    ///
    /// Goes chunk by chunk with the same discipline as `unregister`, so registrations racing with
    /// this are either fully cleared or fully kept.
    pub fn clear(&self) {
        let chunks = self.by_chunk.iter().map(|bucket| *bucket.key()).collect::<Vec<_>>();
        for chunk in chunks {
            if let Entry::Occupied(bucket) = self.by_chunk.entry(chunk) {
                for key in bucket.get() {
                    self.global.remove(key);
                }
                bucket.remove();
                self.decr_world_chunks(chunk.world);
            }
        }
        debug!("cleared index");
    }

    /// Record positions removed by a sweep.
    pub(crate) fn add_sweep_removed(&self, n: u64) {
        self.counters.sweep_removed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn stats(&self) -> IndexStats {
        let lookups = self.counters.lookups.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        IndexStats {
            total_members: self.global.len(),
            total_chunks: self.by_chunk.len(),
            total_worlds: self.world_chunks.len(),
            lookups,
            hits,
            misses: self.counters.misses.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 * 100.0 } else { 0.0 },
            sweep_removed: self.counters.sweep_removed.load(Ordering::Relaxed),
        }
    }
}
