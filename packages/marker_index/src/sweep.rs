//! Periodic removal of marked positions whose cells were emptied behind the index's back.

use crate::{
    host::{
        Affinity,
        CellState,
        Grid,
        Scheduler,
    },
    index::TieredIndex,
    persist::{
        PersistOp,
        Persister,
    },
    service::MarkerService,
};
use std::{
    sync::{
        Arc,
        Weak,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use serde::Serialize;


/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Positions examined.
    pub checked: u64,
    /// Positions unregistered because their cell was empty.
    pub removed: u64,
    /// Positions left alone because their world couldn't be resolved.
    pub unavailable: u64,
}

/// Check every marked position against the grid, unregistering those whose cell is empty.
///
/// Works from a snapshot, so positions registered during the sweep may or may not be checked.
/// If a persister is given, each removal is also mirrored into the chunk's record.
pub fn sweep_once(
    index: &TieredIndex,
    grid: &dyn Grid,
    persister: Option<&Persister>,
) -> SweepReport {
    let mut report = SweepReport::default();
    for pos in index.snapshot() {
        report.checked += 1;
        match grid.cell_state(&pos) {
            Some(CellState::Occupied) => (),
            Some(CellState::Empty) => {
                if index.unregister(&pos) {
                    report.removed += 1;
                    if let Some(persister) = persister {
                        persister.submit(PersistOp::Unmark(pos));
                    }
                }
            }
            None => {
                trace!(%pos, "world unavailable, not sweeping");
                report.unavailable += 1;
            }
        }
    }
    index.add_sweep_removed(report.removed);
    if report.removed > 0 {
        info!(checked = report.checked, removed = report.removed, "swept stale marked positions");
    } else {
        debug!(checked = report.checked, "sweep found nothing stale");
    }
    report
}


/// Stops a periodic sweep when dropped.
#[derive(Debug)]
pub struct SweepGuard(Arc<AtomicBool>);

impl SweepGuard {
    pub fn new() -> Self {
        SweepGuard(Arc::new(AtomicBool::new(false)))
    }

    fn aborted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Default for SweepGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Begin sweeping `service` every `interval` on its host scheduler, until the returned guard is
/// dropped or the service is.
///
/// Pending sweep tasks only hold the service weakly, so they never keep it alive.
pub(crate) fn start_periodic(service: &Arc<MarkerService>, interval: Duration) -> SweepGuard {
    let guard = SweepGuard::new();
    schedule_next(Arc::downgrade(service), &service.host().scheduler, interval, guard.aborted());
    guard
}

fn schedule_next(
    service: Weak<MarkerService>,
    scheduler: &Arc<dyn Scheduler>,
    interval: Duration,
    aborted: Arc<AtomicBool>,
) {
    scheduler.submit(Box::new(move || {
        if aborted.load(Ordering::SeqCst) {
            trace!("periodic sweep stopped");
            return;
        }
        let service = match service.upgrade() {
            Some(service) => service,
            None => return,
        };
        service.sweep_now();
        if !aborted.load(Ordering::SeqCst) {
            schedule_next(Arc::downgrade(&service), &service.host().scheduler, interval, aborted);
        }
    }), interval, Affinity::Any);
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_mem::MemGrid;
    use chunk_data::{
        ChunkGrid,
        Position,
    };

    #[test]
    fn removes_exactly_the_emptied() {
        let index = TieredIndex::new(ChunkGrid::default());
        let grid = MemGrid::new();
        let mut emptied = Vec::new();
        for i in 0..100 {
            let pos = Position::new("overworld", i * 7, 64, -i * 3);
            grid.set_occupied(&pos);
            index.register(&pos);
            if i % 10 == 0 {
                emptied.push(pos);
            }
        }
        for pos in &emptied {
            grid.set_empty(pos);
        }

        let report = sweep_once(&index, &grid, None);
        assert_eq!(report, SweepReport { checked: 100, removed: 10, unavailable: 0 });
        assert_eq!(index.len(), 90);
        for pos in &emptied {
            assert!(!index.is_marked(pos));
        }
        assert_eq!(index.stats().sweep_removed, 10);

        let again = sweep_once(&index, &grid, None);
        assert_eq!(again.removed, 0);
    }

    #[test]
    fn unavailable_world_is_left_alone() {
        let index = TieredIndex::new(ChunkGrid::default());
        let grid = MemGrid::new();
        let pos = Position::new("the_end", 1, 2, 3);
        index.register(&pos);

        let report = sweep_once(&index, &grid, None);
        assert_eq!(report.unavailable, 1);
        assert!(index.is_marked(&pos));
    }

    #[test]
    fn guard_sets_flag_on_drop() {
        let guard = SweepGuard::new();
        let flag = guard.aborted();
        assert!(!flag.load(Ordering::SeqCst));
        drop(guard);
        assert!(flag.load(Ordering::SeqCst));
    }
}
