//! See `MarkerService`.

use crate::{
    event::MarkerEvent,
    filter::CascadingFilter,
    host::Host,
    index::{
        IndexStats,
        TieredIndex,
    },
    persist::{
        PersistOp,
        Persister,
    },
    reconcile::{
        ReconcileReport,
        Reconciler,
    },
    settings::IndexSettings,
    sweep::{
        self,
        SweepGuard,
        SweepReport,
    },
};
use chunk_data::{
    ChunkPos,
    Position,
};
use std::{
    collections::HashSet,
    sync::Arc,
};
use parking_lot::Mutex;


/// The tiered index wired to a host.
///
/// Owns the index and keeps chunk records in sync with it, reconciles against the grid when
/// chunks load, and periodically sweeps out positions whose cells were emptied. All methods
/// take `&self` and are safe to call from any thread.
pub struct MarkerService {
    settings: IndexSettings,
    index: TieredIndex,
    host: Host,
    persister: Persister,
    sweep_guard: Mutex<Option<SweepGuard>>,
}

impl MarkerService {
    /// Construct, without touching the host yet. See `start`.
    ///
    /// Panics if `settings.chunk_size` is zero. Settings obtained through `IndexSettings::read`
    /// are already validated.
    pub fn new(settings: IndexSettings, host: Host) -> Arc<Self> {
        let grid = settings.grid();
        let persister = Persister::new(
            Arc::clone(&host.metadata),
            Arc::clone(&host.scheduler),
            grid,
            settings.metadata_key.clone(),
            settings.record_format,
        );
        Arc::new(MarkerService {
            index: TieredIndex::new(grid),
            settings,
            host,
            persister,
            sweep_guard: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn index(&self) -> &TieredIndex {
        &self.index
    }

    /// Number of record writes which have failed so far.
    pub fn persist_failures(&self) -> u64 {
        self.persister.failures()
    }

    /// Restore state from loaded chunks, then begin periodic sweeping.
    pub fn start(self: &Arc<Self>) -> ReconcileReport {
        let report = self.reconcile_on_startup();
        self.start_sweep();
        report
    }

    /// Begin sweeping every `sweep_interval_secs`, replacing any sweep already running.
    pub fn start_sweep(self: &Arc<Self>) {
        let guard = sweep::start_periodic(self, self.settings.sweep_interval());
        if self.sweep_guard.lock().replace(guard).is_some() {
            debug!("restarted periodic sweep");
        }
    }

    /// Stop periodic sweeping. Record writes already submitted still complete.
    pub fn shutdown(&self) {
        if self.sweep_guard.lock().take().is_some() {
            info!("stopped periodic sweep");
        }
    }

    /// Dispatch an inbound host notification.
    pub fn handle(&self, event: MarkerEvent) {
        match event {
            MarkerEvent::PositionMarked { position, data } => {
                trace!(%position, ?data, "position marked");
                self.register(&position);
            }
            MarkerEvent::PositionUnmarked { position } => {
                trace!(%position, "position unmarked");
                self.unregister(&position);
            }
            MarkerEvent::ChunkLoaded { chunk } => {
                self.reconcile_on_chunk_load(&chunk);
            }
            MarkerEvent::Startup => {
                self.reconcile_on_startup();
            }
            MarkerEvent::ReloadRequested => {
                self.reload();
            }
        }
    }

    /// Mark a position, and schedule it to be added to its chunk's record.
    pub fn register(&self, pos: &Position) -> bool {
        let newly = self.index.register(pos);
        if newly && self.settings.persist_mutations {
            self.persister.submit(PersistOp::Mark(pos.clone()));
        }
        newly
    }

    /// Unmark a position, and schedule it to be removed from its chunk's record.
    pub fn unregister(&self, pos: &Position) -> bool {
        let removed = self.index.unregister(pos);
        if removed && self.settings.persist_mutations {
            self.persister.submit(PersistOp::Unmark(pos.clone()));
        }
        removed
    }

    pub fn is_marked(&self, pos: &Position) -> bool {
        self.index.is_marked(pos)
    }

    pub fn chunk_has_members(&self, chunk: &ChunkPos) -> bool {
        self.index.chunk_has_members(chunk)
    }

    /// Whether the chunk containing a position has any marked positions.
    pub fn chunk_has_members_at(&self, pos: &Position) -> bool {
        self.index.chunk_has_members(&self.index.grid().chunk_of(pos))
    }

    pub fn world_has_members(&self, world: &str) -> bool {
        self.index.world_has_members(world)
    }

    pub fn members_of_chunk(&self, chunk: &ChunkPos) -> HashSet<Position> {
        self.index.members_of_chunk(chunk)
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn filter(&self) -> CascadingFilter<'_> {
        CascadingFilter::new(&self.index)
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler {
            index: &self.index,
            grid: &*self.host.grid,
            persister: &self.persister,
        }
    }

    pub fn reconcile_on_startup(&self) -> ReconcileReport {
        self.reconciler().on_startup()
    }

    pub fn reconcile_on_chunk_load(&self, chunk: &ChunkPos) -> ReconcileReport {
        self.reconciler().on_chunk_load(chunk)
    }

    /// Forget all in-memory state. Records are untouched.
    pub fn clear(&self) {
        self.index.clear();
    }

    /// Rebuild in-memory state from scratch.
    pub fn reload(&self) -> ReconcileReport {
        info!("reloading marker index");
        self.clear();
        let report = self.reconcile_on_startup();
        info!(restored = report.restored, "reloaded marker index");
        report
    }

    /// Sweep immediately, on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        let persister = if self.settings.persist_mutations {
            Some(&self.persister)
        } else {
            None
        };
        sweep::sweep_once(&self.index, &*self.host.grid, persister)
    }
}
