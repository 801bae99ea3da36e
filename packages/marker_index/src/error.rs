//! Error taxonomy. Nothing here is fatal to the host; see each variant for how it's recovered.

use chunk_data::{
    ChunkPos,
    CodecError,
};


#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A position key or record entry does not decode to a valid `world,x,y,z`. The entry is
    /// dropped and processing continues.
    #[error(transparent)]
    MalformedKey(#[from] CodecError),
    /// A decoded entry references a world the host can't currently resolve. The entry is skipped.
    #[error("world {0:?} unavailable")]
    WorldUnavailable(String),
    /// The host's metadata store failed a write. The in-memory index is unaffected; the record
    /// misses that one change.
    #[error("failed to write record for chunk {chunk}")]
    PersistenceWriteFailure {
        chunk: ChunkPos,
        #[source]
        source: anyhow::Error,
    },
    /// The host's metadata store failed a read. Treated as there being no record.
    #[error("failed to read record for chunk {chunk}")]
    PersistenceReadFailure {
        chunk: ChunkPos,
        #[source]
        source: anyhow::Error,
    },
}
