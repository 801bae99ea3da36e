//! Interning of world names.

use crate::{
    coord::PositionKey,
    position::Position,
    CodecError,
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use parking_lot::RwLock;


/// Small sequential id for an interned world name. See crate docs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorldId(pub u32);


/// Table of interned world names. Thread-safe.
///
/// Names are never un-interned, so ids remain valid for the lifetime of the
/// table. The number of distinct worlds in a process is expected to be tiny.
#[derive(Debug, Default)]
pub struct Worlds(RwLock<Table>);

#[derive(Debug, Default)]
struct Table {
    ids: HashMap<Arc<str>, WorldId>,
    names: Vec<Arc<str>>,
}

impl Worlds {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id for a world name if it has been interned, without interning it.
    pub fn lookup(&self, name: &str) -> Option<WorldId> {
        self.0.read().ids.get(name).copied()
    }

    /// Get the id for a world name, interning it if necessary.
    pub fn intern(&self, name: &Arc<str>) -> WorldId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        let mut table = self.0.write();
        // may have been raced in between the read and write lock
        if let Some(&id) = table.ids.get(&**name) {
            return id;
        }
        let id = WorldId(u32::try_from(table.names.len()).expect("too many worlds"));
        table.ids.insert(Arc::clone(name), id);
        table.names.push(Arc::clone(name));
        id
    }

    /// Get the name for a world id.
    pub fn resolve(&self, id: WorldId) -> Option<Arc<str>> {
        self.0.read().names.get(id.0 as usize).cloned()
    }

    /// Number of interned worlds.
    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode a position into its packed key, interning its world.
    pub fn encode(&self, pos: &Position) -> PositionKey {
        PositionKey::pack(self.intern(&pos.world), pos.gtc)
    }

    /// Encode a position into its packed key if its world has been interned.
    ///
    /// A position in a never-seen world can't be a member of anything keyed by
    /// this table, so read-only callers use this to avoid growing it.
    pub fn try_encode(&self, pos: &Position) -> Option<PositionKey> {
        self.lookup(&pos.world).map(|world| PositionKey::pack(world, pos.gtc))
    }

    /// Decode a packed key back into a position.
    pub fn decode(&self, key: PositionKey) -> Result<Position, CodecError> {
        let world = self.resolve(key.world()).ok_or(CodecError::UnknownWorld(key.world()))?;
        Ok(Position { world, gtc: key.gtc() })
    }
}
