//! Inbound notifications from the host's event layer. See `MarkerService::handle`.

use chunk_data::{
    ChunkPos,
    Position,
};
use std::sync::Arc;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEvent {
    /// A position became marked. `data` is an opaque label from the host's attribute store,
    /// only used for diagnostics.
    PositionMarked {
        position: Position,
        data: Option<Arc<str>>,
    },
    PositionUnmarked {
        position: Position,
    },
    ChunkLoaded {
        chunk: ChunkPos,
    },
    Startup,
    ReloadRequested,
}
