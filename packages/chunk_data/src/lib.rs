//! Coordinate codec for tracking positions in a chunked, multi-world tile grid.
//!
//! Basic example:
//!
//! ```
//! use chunk_data::{
//!     ChunkGrid,
//!     Position,
//!     Worlds,
//! };
//!
//! let worlds = Worlds::new();
//! let grid = ChunkGrid::default();
//!
//! let pos = Position::new("overworld", 10, 64, -5);
//! let key = worlds.encode(&pos);
//! assert_eq!(worlds.decode(key).unwrap(), pos);
//!
//! let chunk = grid.chunk_of(&pos);
//! assert_eq!((chunk.cc.x, chunk.cc.y), (0, -1));
//! assert_eq!(pos.to_string(), "overworld,10,64,-5");
//! ```
//!
//! ## worlds, world ids
//!
//! The grid is partitioned into _worlds_, top-level namespaces identified by
//! name. Since names are strings, and strings are slow to hash and compare,
//! each world name that is ever seen is _interned_ into a `Worlds` table and
//! assigned a small sequential _world id_. World ids are only meaningful
//! within the `Worlds` table that assigned them, and are not stable across
//! process restarts. Anything which must survive a restart is stored with the
//! world name instead.
//!
//! ## positions, position keys
//!
//! A tile is identified by a _position_: a world name plus a 3-vec of `i32`
//! global tile coordinates. A position's canonical in-memory form is its
//! _position key_, a `u128` packed as such:
//!
//! ```text
//! world id (32) | x (32) | y (32) | z (32)
//! ```
//!
//! Every `i32` coordinate is representable, so packing is collision-free, and
//! two positions with equal (world, x, y, z) always pack to the same key
//! within one `Worlds` table.
//!
//! ## chunks, chunk keys
//!
//! Tiles are grouped into columnar _chunks_ of `size` by `size` tiles, which
//! extend indefinitely vertically. A chunk is identified by its world and a
//! 2-vec _chunk coordinate_ (cc), obtained by floor-dividing the tile's x and
//! z by the chunk size. The size must match whatever the surrounding
//! simulation uses for loading and metadata storage, so it's carried around
//! in a `ChunkGrid` rather than hard-coded.
//!
//! ## text form
//!
//! A position also has a human-readable text form, `world,x,y,z`, which is
//! what gets persisted. Parsing it is fallible, see `CodecError`.

mod coord;
mod position;
mod world;


pub use crate::{
    coord::{
        ChunkGrid,
        ChunkKey,
        PositionKey,
        DEFAULT_CHUNK_SIZE,
    },
    position::{
        ChunkPos,
        Position,
    },
    world::{
        WorldId,
        Worlds,
    },
};


/// Failure to decode something into a well-formed position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input does not have the `world,x,y,z` shape.
    #[error("malformed position key {key:?}: {reason}")]
    MalformedKey {
        key: String,
        reason: &'static str,
    },
    /// Packed key references a world id that its `Worlds` table never assigned.
    #[error("unknown world id {0:?}")]
    UnknownWorld(WorldId),
}
