//! Coordinate bit-fiddling.

use crate::{
    position::{
        ChunkPos,
        Position,
    },
    world::WorldId,
};
use vek::*;


/// Default chunk width and depth, in tiles.
pub const DEFAULT_CHUNK_SIZE: u32 = 16;

const COMPONENT_BITS: u32 = 32;
const COMPONENT_MASK: u128 = 0xffff_ffff;

const WORLD_SHIFT: u32 = COMPONENT_BITS * 3;
const X_SHIFT: u32 = COMPONENT_BITS * 2;
const Y_SHIFT: u32 = COMPONENT_BITS;


/// Packed, fixed-width identity of a position. See crate docs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey(pub u128);

impl PositionKey {
    /// Pack a world id and global tile coordinate.
    pub fn pack(world: WorldId, gtc: Vec3<i32>) -> Self {
        PositionKey(
            ((world.0 as u128) << WORLD_SHIFT)
            | ((gtc.x as u32 as u128) << X_SHIFT)
            | ((gtc.y as u32 as u128) << Y_SHIFT)
            | (gtc.z as u32 as u128)
        )
    }

    /// Get the world id part.
    pub fn world(self) -> WorldId {
        WorldId((self.0 >> WORLD_SHIFT) as u32)
    }

    /// Get the global tile coordinate part.
    pub fn gtc(self) -> Vec3<i32> {
        Vec3 {
            x: ((self.0 >> X_SHIFT) & COMPONENT_MASK) as u32 as i32,
            y: ((self.0 >> Y_SHIFT) & COMPONENT_MASK) as u32 as i32,
            z: (self.0 & COMPONENT_MASK) as u32 as i32,
        }
    }
}


/// Interned identity of a chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub world: WorldId,
    pub cc: Vec2<i32>,
}


/// The partitioning of tiles into chunks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    size: i32,
}

impl ChunkGrid {
    /// Construct with the given chunk width/depth in tiles.
    ///
    /// Panics if zero or larger than `i32::MAX`.
    pub fn new(size: u32) -> Self {
        let size = i32::try_from(size).ok().filter(|&n| n > 0).expect("chunk size out of range");
        ChunkGrid { size }
    }

    /// Chunk width/depth in tiles.
    pub fn size(&self) -> u32 {
        self.size as u32
    }

    /// Get the chunk coordinate containing the given tile x and z.
    pub fn cc_of(&self, x: i32, z: i32) -> Vec2<i32> {
        Vec2 {
            x: x.div_euclid(self.size),
            y: z.div_euclid(self.size),
        }
    }

    /// Get the chunk containing the given position.
    pub fn chunk_of(&self, pos: &Position) -> ChunkPos {
        ChunkPos {
            world: pos.world.clone(),
            cc: self.cc_of(pos.gtc.x, pos.gtc.z),
        }
    }

    /// Get the chunk key containing the given position key.
    pub fn chunk_key_of(&self, key: PositionKey) -> ChunkKey {
        let gtc = key.gtc();
        ChunkKey {
            world: key.world(),
            cc: self.cc_of(gtc.x, gtc.z),
        }
    }
}

impl Default for ChunkGrid {
    fn default() -> Self {
        ChunkGrid::new(DEFAULT_CHUNK_SIZE)
    }
}
