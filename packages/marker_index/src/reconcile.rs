//! Rebuilding index state from persisted records, checked against the live grid.

use crate::{
    error::IndexError,
    host::{
        CellState,
        Grid,
    },
    index::TieredIndex,
    persist::Persister,
    record,
};
use chunk_data::ChunkPos;
use std::ops::AddAssign;
use serde::Serialize;


/// Outcome counts of reconciling one or more chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Chunks whose records were examined.
    pub chunks: u64,
    /// Chunks not examined because they were already indexed.
    pub skipped: u64,
    /// Entries added to the index.
    pub restored: u64,
    /// Entries whose cell is empty, not added.
    pub stale: u64,
    /// Entries which failed to decode.
    pub malformed: u64,
    /// Entries whose world the host can't resolve, not added.
    pub unavailable: u64,
    /// Chunks whose record couldn't be read, treated as having none.
    pub unreadable: u64,
}

impl AddAssign for ReconcileReport {
    fn add_assign(&mut self, rhs: Self) {
        self.chunks += rhs.chunks;
        self.skipped += rhs.skipped;
        self.restored += rhs.restored;
        self.stale += rhs.stale;
        self.malformed += rhs.malformed;
        self.unavailable += rhs.unavailable;
        self.unreadable += rhs.unreadable;
    }
}


/// Borrowed context for reconciling chunks. Safe to use from any thread.
pub struct Reconciler<'a> {
    pub index: &'a TieredIndex,
    pub grid: &'a dyn Grid,
    pub persister: &'a Persister,
}

impl<'a> Reconciler<'a> {
    /// Reconcile every loaded chunk in every world the host knows.
    pub fn on_startup(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for world in self.grid.worlds() {
            for cc in self.grid.loaded_chunks(&world) {
                report += self.reconcile_chunk(&ChunkPos { world: world.clone(), cc });
            }
        }
        info!(
            chunks = report.chunks,
            restored = report.restored,
            stale = report.stale,
            malformed = report.malformed,
            unavailable = report.unavailable,
            "reconciled index against loaded chunks",
        );
        report
    }

    /// Reconcile a chunk which just loaded, unless it's already indexed.
    pub fn on_chunk_load(&self, chunk: &ChunkPos) -> ReconcileReport {
        if self.index.chunk_has_members(chunk) {
            trace!(%chunk, "chunk already indexed, not reconciling");
            return ReconcileReport { skipped: 1, ..Default::default() };
        }
        let report = self.reconcile_chunk(chunk);
        if report.restored > 0 {
            debug!(%chunk, restored = report.restored, "restored marked positions from chunk record");
        }
        report
    }

    /// Add every entry of the chunk's record whose cell is still occupied to the index.
    ///
    /// Nothing is written. Stale entries stay in the record and are skipped again next time.
    pub fn reconcile_chunk(&self, chunk: &ChunkPos) -> ReconcileReport {
        let mut report = ReconcileReport { chunks: 1, ..Default::default() };
        let blob = match self.persister.read_record(chunk) {
            Ok(Some(blob)) => blob,
            Ok(None) => return report,
            Err(e) => {
                warn!(%e, "treating unreadable chunk record as empty");
                report.unreadable += 1;
                return report;
            }
        };

        let decoded = record::deserialize_counted(&blob);
        report.malformed = decoded.malformed();
        for pos in decoded.positions {
            match self.grid.cell_state(&pos) {
                None => {
                    let e = IndexError::WorldUnavailable(pos.world.to_string());
                    debug!(%e, %pos, "skipping record entry");
                    report.unavailable += 1;
                }
                Some(CellState::Empty) => {
                    debug!(%pos, "skipping stale record entry");
                    report.stale += 1;
                }
                Some(CellState::Occupied) => {
                    let actual = self.index.grid().chunk_of(&pos);
                    if &actual != chunk {
                        debug!(%pos, record = %chunk, %actual, "record entry belongs to another chunk");
                    }
                    if self.index.register(&pos) {
                        report.restored += 1;
                    }
                }
            }
        }
        report
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host_mem::*,
        record::RecordFormat,
    };
    use chunk_data::{
        ChunkGrid,
        Position,
    };
    use std::sync::Arc;

    const KEY: &str = "marked_positions";

    struct Fixture {
        index: TieredIndex,
        grid: MemGrid,
        metadata: Arc<MemMetadata>,
        persister: Persister,
    }

    impl Fixture {
        fn new() -> Self {
            let metadata = Arc::new(MemMetadata::new());
            let persister = Persister::new(
                metadata.clone(),
                Arc::new(ManualScheduler::new()),
                ChunkGrid::default(),
                KEY.to_owned(),
                RecordFormat::Legacy,
            );
            Fixture {
                index: TieredIndex::new(ChunkGrid::default()),
                grid: MemGrid::new(),
                metadata,
                persister,
            }
        }

        fn reconciler(&self) -> Reconciler<'_> {
            Reconciler {
                index: &self.index,
                grid: &self.grid,
                persister: &self.persister,
            }
        }
    }

    #[test]
    fn repairs_against_live_grid() {
        let f = Fixture::new();
        let chunk = ChunkPos::new("overworld", 0, 0);
        let a = Position::new("overworld", 1, 64, 1);
        let b = Position::new("overworld", 2, 64, 2);
        let c = Position::new("overworld", 3, 64, 3);
        f.grid.load_chunk(&chunk);
        f.grid.set_occupied(&a);
        f.grid.set_occupied(&c);
        f.metadata.insert(&chunk, KEY, "overworld,1,64,1;overworld,2,64,2;overworld,3,64,3");

        let report = f.reconciler().on_chunk_load(&chunk);
        assert_eq!(report.restored, 2);
        assert_eq!(report.stale, 1);
        assert!(f.index.is_marked(&a));
        assert!(!f.index.is_marked(&b));
        assert!(f.index.is_marked(&c));
        // stale entry left for later
        assert_eq!(f.metadata.write_count(), 0);
    }

    #[test]
    fn chunk_load_of_indexed_chunk_is_noop() {
        let f = Fixture::new();
        let chunk = ChunkPos::new("overworld", 0, 0);
        let a = Position::new("overworld", 1, 64, 1);
        f.grid.set_occupied(&a);
        f.metadata.insert(&chunk, KEY, "overworld,1,64,1");

        assert_eq!(f.reconciler().on_chunk_load(&chunk).restored, 1);
        let again = f.reconciler().on_chunk_load(&chunk);
        assert_eq!(again, ReconcileReport { skipped: 1, ..Default::default() });
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn tolerates_bad_entries_and_unreadable_records() {
        let f = Fixture::new();
        let chunk = ChunkPos::new("overworld", 0, 0);
        let a = Position::new("overworld", 1, 64, 1);
        f.grid.set_occupied(&a);
        f.metadata.insert(&chunk, KEY, "overworld,1,64,1;garbage;gone_world,1,1,1");

        let report = f.reconciler().reconcile_chunk(&chunk);
        assert_eq!((report.restored, report.malformed, report.unavailable), (1, 1, 1));

        let other = ChunkPos::new("overworld", 5, 5);
        f.metadata.insert(&other, KEY, "overworld,80,64,80");
        f.metadata.set_fail_reads(true);
        let report = f.reconciler().reconcile_chunk(&other);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.restored, 0);
    }

    #[test]
    fn startup_covers_all_loaded_chunks() {
        let f = Fixture::new();
        let mut expected = Vec::new();
        for (world, cx, cz) in [("overworld", 0, 0), ("overworld", -1, 2), ("nether", 3, -3)] {
            let chunk = ChunkPos::new(world, cx, cz);
            let pos = Position::new(world, cx * 16 + 4, 70, cz * 16 + 9);
            f.grid.load_chunk(&chunk);
            f.grid.set_occupied(&pos);
            f.metadata.insert(&chunk, KEY, &pos.to_string());
            expected.push(pos);
        }
        // record in an unloaded chunk is not touched
        let unloaded = ChunkPos::new("overworld", 9, 9);
        let hidden = Position::new("overworld", 150, 70, 150);
        f.grid.set_occupied(&hidden);
        f.metadata.insert(&unloaded, KEY, &hidden.to_string());

        let report = f.reconciler().on_startup();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.restored, 3);
        for pos in &expected {
            assert!(f.index.is_marked(pos));
        }
        assert!(!f.index.is_marked(&hidden));
    }
}
