//! Tiered spatial index of marked positions in a chunked, multi-world tile grid.
//!
//! The index answers "is this position marked?" in constant time, as well as
//! the coarser "does this chunk / world contain anything marked?", so that
//! high-volume event handlers can reject irrelevant events cheaply (see
//! `CascadingFilter`).
//!
//! The grid itself is owned by a host. The index keeps a durable record of
//! marked positions in each chunk's host-owned metadata, and reconciles
//! against the live grid when chunks load and on a periodic sweep, since the
//! grid can change underneath it without notice.
//!
//! Entry point is `MarkerService`, which is constructed with a `Host` bundling
//! the host's grid, chunk metadata store, and task scheduler.

#[macro_use]
extern crate tracing;

pub mod error;
pub mod settings;
pub mod logging;
pub mod host;
pub mod host_mem;
pub mod thread_pool;
pub mod index;
pub mod record;
pub mod persist;
pub mod reconcile;
pub mod sweep;
pub mod filter;
pub mod event;
pub mod service;


pub use crate::{
    error::IndexError,
    settings::IndexSettings,
    host::{
        Affinity,
        CellState,
        ChunkMetadata,
        Grid,
        Host,
        Scheduler,
        Task,
    },
    index::{
        IndexStats,
        TieredIndex,
    },
    record::RecordFormat,
    reconcile::ReconcileReport,
    sweep::SweepReport,
    filter::{
        CascadingFilter,
        Verdict,
    },
    event::MarkerEvent,
    service::MarkerService,
};
pub use chunk_data::{
    ChunkPos,
    Position,
};
