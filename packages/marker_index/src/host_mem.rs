//! In-process host implementation, for embedding without a real host and for tests.

use crate::host::{
    Affinity,
    CellState,
    ChunkMetadata,
    Grid,
    Scheduler,
    Task,
};
use chunk_data::{
    ChunkPos,
    Position,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use parking_lot::{
    Mutex,
    RwLock,
};
use vek::*;
use anyhow::*;


/// Grid which only tracks which cells are occupied and which chunks are loaded.
#[derive(Debug, Default)]
pub struct MemGrid {
    worlds: RwLock<HashMap<Arc<str>, MemWorld>>,
}

#[derive(Debug, Default)]
struct MemWorld {
    occupied: HashSet<Vec3<i32>>,
    loaded: HashSet<Vec2<i32>>,
}

impl MemGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a world resolvable. No-op if it already is.
    pub fn add_world(&self, world: &str) {
        self.worlds.write().entry(Arc::from(world)).or_default();
    }

    /// Make a world unresolvable, forgetting its cells.
    pub fn remove_world(&self, world: &str) {
        self.worlds.write().remove(world);
    }

    /// Fill a cell, adding its world if necessary.
    pub fn set_occupied(&self, pos: &Position) {
        self.worlds.write().entry(pos.world.clone()).or_default().occupied.insert(pos.gtc);
    }

    /// Empty a cell.
    pub fn set_empty(&self, pos: &Position) {
        if let Some(world) = self.worlds.write().get_mut(&pos.world) {
            world.occupied.remove(&pos.gtc);
        }
    }

    /// Mark a chunk as loaded, adding its world if necessary.
    pub fn load_chunk(&self, chunk: &ChunkPos) {
        self.worlds.write().entry(chunk.world.clone()).or_default().loaded.insert(chunk.cc);
    }

    pub fn unload_chunk(&self, chunk: &ChunkPos) {
        if let Some(world) = self.worlds.write().get_mut(&chunk.world) {
            world.loaded.remove(&chunk.cc);
        }
    }
}

impl Grid for MemGrid {
    fn worlds(&self) -> Vec<Arc<str>> {
        let mut worlds = self.worlds.read().keys().cloned().collect::<Vec<_>>();
        worlds.sort();
        worlds
    }

    fn loaded_chunks(&self, world: &str) -> Vec<Vec2<i32>> {
        self.worlds
            .read()
            .get(world)
            .map(|world| world.loaded.iter().copied().collect())
            .unwrap_or_default()
    }

    fn cell_state(&self, pos: &Position) -> Option<CellState> {
        self.worlds
            .read()
            .get(&pos.world)
            .map(|world|
                if world.occupied.contains(&pos.gtc) {
                    CellState::Occupied
                } else {
                    CellState::Empty
                })
    }
}


/// Chunk metadata store backed by a hash map, with injectable failures.
#[derive(Debug, Default)]
pub struct MemMetadata {
    entries: Mutex<HashMap<(ChunkPos, String), String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an entry directly, ignoring injected failures.
    pub fn get(&self, chunk: &ChunkPos, key: &str) -> Option<String> {
        self.entries.lock().get(&(chunk.clone(), key.to_owned())).cloned()
    }

    /// Write an entry directly, ignoring injected failures and not counting as a write.
    pub fn insert(&self, chunk: &ChunkPos, key: &str, value: &str) {
        self.entries.lock().insert((chunk.clone(), key.to_owned()), value.to_owned());
    }

    /// Make subsequent `read` calls fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `write` and `remove` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `write` and `remove` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        ensure!(!self.fail_writes.load(Ordering::SeqCst), "injected write failure");
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ChunkMetadata for MemMetadata {
    fn read(&self, chunk: &ChunkPos, key: &str) -> Result<Option<String>> {
        ensure!(!self.fail_reads.load(Ordering::SeqCst), "injected read failure");
        Ok(self.get(chunk, key))
    }

    fn write(&self, chunk: &ChunkPos, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.insert(chunk, key, value);
        Ok(())
    }

    fn remove(&self, chunk: &ChunkPos, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().remove(&(chunk.clone(), key.to_owned()));
        Ok(())
    }
}


/// Scheduler which only runs tasks when told to, against a virtual clock.
///
/// Tasks submitted by running tasks are queued like any other, so a self-rescheduling task can't
/// recurse.
#[derive(Default)]
pub struct ManualScheduler(Mutex<ManualState>);

#[derive(Default)]
struct ManualState {
    // virtual time elapsed since construction
    now: Duration,
    // submission counter, for FIFO among tasks due at the same time
    next_seq: u64,
    queue: Vec<Pending>,
}

struct Pending {
    due: Duration,
    seq: u64,
    affinity: Affinity,
    task: Task,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run tasks which are due until none are, including ones submitted along the way. Returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop_due() {
            task();
            ran += 1;
        }
        ran
    }

    /// Advance the virtual clock, then `run_pending`.
    pub fn advance(&self, by: Duration) -> usize {
        self.0.lock().now += by;
        self.run_pending()
    }

    /// Number of queued tasks, due or not.
    pub fn pending(&self) -> usize {
        self.0.lock().queue.len()
    }

    /// Affinities of queued tasks, in submission order.
    pub fn pending_affinities(&self) -> Vec<Affinity> {
        let state = self.0.lock();
        let mut pending = state.queue.iter().collect::<Vec<_>>();
        pending.sort_by_key(|p| p.seq);
        pending.into_iter().map(|p| p.affinity.clone()).collect()
    }

    // remove the earliest due task, releasing the lock before it runs
    fn pop_due(&self) -> Option<Task> {
        let mut state = self.0.lock();
        let now = state.now;
        let i = state.queue
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= now)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        Some(state.queue.swap_remove(i).task)
    }
}

impl Scheduler for ManualScheduler {
    fn submit(&self, task: Task, delay: Duration, affinity: Affinity) {
        let mut state = self.0.lock();
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Pending { due, seq, affinity, task });
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_scheduler_respects_delay_and_order() {
        let scheduler = Arc::new(ManualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, delay) in [("b", 10), ("a", 0), ("c", 10), ("d", 5)] {
            let log = Arc::clone(&log);
            scheduler.submit(
                Box::new(move || log.lock().push(name)),
                Duration::from_secs(delay),
                Affinity::Any,
            );
        }
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.advance(Duration::from_secs(5)), 1);
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.advance(Duration::from_secs(5)), 2);
        assert_eq!(*log.lock(), vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn tasks_may_submit_tasks() {
        let scheduler = Arc::new(ManualScheduler::new());
        let count = Arc::new(AtomicU64::new(0));
        let scheduler2 = Arc::clone(&scheduler);
        let count2 = Arc::clone(&count);
        scheduler.submit(Box::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
            let count3 = Arc::clone(&count2);
            scheduler2.submit(
                Box::new(move || { count3.fetch_add(1, Ordering::SeqCst); }),
                Duration::ZERO,
                Affinity::Any,
            );
        }), Duration::ZERO, Affinity::Any);
        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mem_grid_cells_and_chunks() {
        let grid = MemGrid::new();
        let pos = Position::new("overworld", 1, 2, 3);
        assert_eq!(grid.cell_state(&pos), None);
        grid.set_occupied(&pos);
        assert_eq!(grid.cell_state(&pos), Some(CellState::Occupied));
        grid.set_empty(&pos);
        assert_eq!(grid.cell_state(&pos), Some(CellState::Empty));

        grid.load_chunk(&ChunkPos::new("nether", 4, -4));
        assert_eq!(grid.worlds(), vec![Arc::<str>::from("nether"), Arc::from("overworld")]);
        assert_eq!(grid.loaded_chunks("nether"), vec![Vec2::new(4, -4)]);
        assert!(grid.loaded_chunks("missing").is_empty());

        grid.remove_world("overworld");
        assert_eq!(grid.cell_state(&pos), None);

        grid.add_world("the_end");
        assert_eq!(grid.cell_state(&Position::new("the_end", 0, 0, 0)), Some(CellState::Empty));
        assert!(grid.loaded_chunks("the_end").is_empty());

        grid.unload_chunk(&ChunkPos::new("nether", 4, -4));
        assert!(grid.loaded_chunks("nether").is_empty());
        assert_eq!(grid.worlds(), vec![Arc::<str>::from("nether"), Arc::from("the_end")]);
    }
}
