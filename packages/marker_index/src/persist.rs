//! See `Persister`.

use crate::{
    error::IndexError,
    host::{
        Affinity,
        ChunkMetadata,
        Scheduler,
    },
    record::{
        self,
        RecordFormat,
    },
};
use chunk_data::{
    ChunkGrid,
    ChunkPos,
    Position,
};
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};


/// A change to mirror into a chunk's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOp {
    Mark(Position),
    Unmark(Position),
}

impl PersistOp {
    pub fn position(&self) -> &Position {
        match self {
            PersistOp::Mark(pos) | PersistOp::Unmark(pos) => pos,
        }
    }
}


/// Mirrors index mutations into chunk metadata records, best-effort and asynchronously.
///
/// Each op is submitted to the scheduler with the affinity of the chunk it touches, and applied
/// as a read-modify-write of that chunk's record, so concurrent writers of the same record lose
/// nothing as long as the host serializes work per chunk. A failed op is logged and dropped; the
/// in-memory index is never affected.
pub struct Persister {
    // shared state needed to complete a persist job
    ctx: Arc<PersistCtx>,
    scheduler: Arc<dyn Scheduler>,
    grid: ChunkGrid,
}

// shared state needed to complete a persist job
struct PersistCtx {
    metadata: Arc<dyn ChunkMetadata>,
    key: String,
    format: RecordFormat,
    failures: AtomicU64,
}

impl Persister {
    /// Construct.
    pub fn new(
        metadata: Arc<dyn ChunkMetadata>,
        scheduler: Arc<dyn Scheduler>,
        grid: ChunkGrid,
        key: String,
        format: RecordFormat,
    ) -> Self {
        Persister {
            ctx: Arc::new(PersistCtx {
                metadata,
                key,
                format,
                failures: AtomicU64::new(0),
            }),
            scheduler,
            grid,
        }
    }

    /// Schedule an op to be applied. Never blocks on I/O.
    pub fn submit(&self, op: PersistOp) {
        let chunk = self.grid.chunk_of(op.position());
        let ctx = Arc::clone(&self.ctx);
        let affinity = Affinity::Chunk(chunk.clone());
        self.scheduler.submit(Box::new(move || {
            if let Err(e) = ctx.apply(&chunk, &op) {
                ctx.failures.fetch_add(1, Ordering::Relaxed);
                error!(%e, source=%format_source(&e), ?op, "record write failed");
            }
        }), Duration::ZERO, affinity);
    }

    /// Read the raw record for a chunk.
    pub fn read_record(&self, chunk: &ChunkPos) -> Result<Option<String>, IndexError> {
        self.ctx.read(chunk)
    }

    /// Number of ops that have failed so far.
    pub fn failures(&self) -> u64 {
        self.ctx.failures.load(Ordering::Relaxed)
    }
}

impl PersistCtx {
    fn read(&self, chunk: &ChunkPos) -> Result<Option<String>, IndexError> {
        self.metadata
            .read(chunk, &self.key)
            .map_err(|source| IndexError::PersistenceReadFailure {
                chunk: chunk.clone(),
                source,
            })
    }

    // read-modify-write the chunk's record
    fn apply(&self, chunk: &ChunkPos, op: &PersistOp) -> Result<(), IndexError> {
        // refusing to write on read failure, since we'd clobber whatever's there
        let existing = self.read(chunk)?;
        let decoded = existing
            .as_deref()
            .map(record::deserialize_counted)
            .unwrap_or_default();
        // an escaped record may hold entries the legacy format can't, so it stays escaped
        let format = if decoded.escaped { RecordFormat::Escaped } else { self.format };
        let mut positions = decoded.positions;

        let changed = match op {
            PersistOp::Mark(pos) => positions.insert(pos.clone()),
            PersistOp::Unmark(pos) => positions.remove(pos),
        };
        if !changed {
            return Ok(());
        }

        let blob = record::serialize_with_unparsed(&positions, &decoded.unparsed, format);
        let result =
            if blob.is_empty() {
                self.metadata.remove(chunk, &self.key)
            } else {
                self.metadata.write(chunk, &self.key, &blob)
            };
        result.map_err(|source| IndexError::PersistenceWriteFailure {
            chunk: chunk.clone(),
            source,
        })?;
        trace!(%chunk, ?op, "record updated");
        Ok(())
    }
}

// display an error's source chain, if any
fn format_source(e: &IndexError) -> String {
    use std::error::Error;

    let mut buf = String::new();
    let mut source = e.source();
    while let Some(e) = source {
        if !buf.is_empty() {
            buf.push_str(": ");
        }
        buf.push_str(&e.to_string());
        source = e.source();
    }
    buf
}
