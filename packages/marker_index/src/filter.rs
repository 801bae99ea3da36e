//! Cheapest-first relevance check for high-volume event handlers.

use crate::index::TieredIndex;
use chunk_data::{
    Position,
    PositionKey,
};


/// Which check of a `CascadingFilter` settled the question.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing marked anywhere in the position's world.
    NoWorldMembers,
    /// Nothing marked in the position's chunk.
    NoChunkMembers,
    /// Chunk has marked positions, but not this one.
    Unmarked,
    Marked,
}

impl Verdict {
    pub fn passes(self) -> bool {
        self == Verdict::Marked
    }
}

/// Rejects positions at the coarsest tier that can rule them out.
///
/// Most events in a busy grid are in worlds or chunks with nothing marked, and those are
/// rejected without touching the position tier. `passes(p)` always equals `is_marked(p)`.
#[derive(Debug, Copy, Clone)]
pub struct CascadingFilter<'a> {
    index: &'a TieredIndex,
}

impl<'a> CascadingFilter<'a> {
    pub fn new(index: &'a TieredIndex) -> Self {
        CascadingFilter { index }
    }

    pub fn verdict(&self, pos: &Position) -> Verdict {
        let world = match self.index.worlds().lookup(&pos.world) {
            Some(world) => world,
            None => return Verdict::NoWorldMembers,
        };
        if !self.index.world_has_members_id(world) {
            return Verdict::NoWorldMembers;
        }
        let key = PositionKey::pack(world, pos.gtc);
        if !self.index.chunk_has_members_key(self.index.grid().chunk_key_of(key)) {
            return Verdict::NoChunkMembers;
        }
        if self.index.is_marked_key(key) {
            Verdict::Marked
        } else {
            Verdict::Unmarked
        }
    }

    pub fn passes(&self, pos: &Position) -> bool {
        self.verdict(pos).passes()
    }
}
