//! Name-based position and chunk identities, and the `world,x,y,z` text form.

use crate::CodecError;
use std::{
    cmp::Ordering,
    fmt::{
        self,
        Display,
        Formatter,
    },
    str::FromStr,
    sync::Arc,
};
use vek::*;


/// A tile in some world. Immutable value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub world: Arc<str>,
    pub gtc: Vec3<i32>,
}

impl Position {
    /// Construct from a world name and global tile coordinates.
    pub fn new(world: impl Into<Arc<str>>, x: i32, y: i32, z: i32) -> Self {
        Position {
            world: world.into(),
            gtc: Vec3 { x, y, z },
        }
    }

    // sort key, world then x y z
    fn sort_key(&self) -> (&str, i32, i32, i32) {
        (&*self.world, self.gtc.x, self.gtc.y, self.gtc.z)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{},{},{},{}", self.world, self.gtc.x, self.gtc.y, self.gtc.z)
    }
}

impl FromStr for Position {
    type Err = CodecError;

    /// Parse the `world,x,y,z` text form. Coordinates are plain decimal integers, with no
    /// surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, CodecError> {
        let malformed = |reason| CodecError::MalformedKey { key: s.to_owned(), reason };

        let mut parts = s.split(',');
        let (world, x, y, z) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(world), Some(x), Some(y), Some(z)) => (world, x, y, z),
            _ => return Err(malformed("expected 4 fields")),
        };
        if parts.next().is_some() {
            return Err(malformed("expected 4 fields"));
        }
        if world.is_empty() {
            return Err(malformed("empty world name"));
        }
        let coord = |part: &str| part.parse::<i32>().map_err(|_| malformed("non-numeric coordinate"));
        Ok(Position::new(world, coord(x)?, coord(y)?, coord(z)?))
    }
}


/// A chunk in some world.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub world: Arc<str>,
    /// Chunk coordinate. `cc.x` is along tile x, `cc.y` is along tile z.
    pub cc: Vec2<i32>,
}

impl ChunkPos {
    pub fn new(world: impl Into<Arc<str>>, x: i32, z: i32) -> Self {
        ChunkPos {
            world: world.into(),
            cc: Vec2 { x, y: z },
        }
    }
}

impl Display for ChunkPos {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}_{}_{}", self.world, self.cc.x, self.cc.y)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form() {
        let pos = Position::new("overworld", 10, 64, -5);
        assert_eq!(pos.to_string(), "overworld,10,64,-5");
        assert_eq!("overworld,10,64,-5".parse::<Position>().unwrap(), pos);
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        for s in ["overworld,1,2", "overworld,1,2,3,4", "", "overworld"] {
            assert!(matches!(
                s.parse::<Position>(),
                Err(CodecError::MalformedKey { reason: "expected 4 fields", .. }),
            ), "{:?}", s);
        }
    }

    #[test]
    fn non_numeric_is_malformed() {
        assert!(matches!(
            "overworld,1,two,3".parse::<Position>(),
            Err(CodecError::MalformedKey { reason: "non-numeric coordinate", .. }),
        ));
        assert!("overworld,1,2,99999999999".parse::<Position>().is_err());
        assert!(",1,2,3".parse::<Position>().is_err());
        assert!("overworld, 1,2,3".parse::<Position>().is_err());
        assert!("overworld,1,2,3 ".parse::<Position>().is_err());
    }

    #[test]
    fn ordering_is_world_then_coords() {
        let mut v = vec![
            Position::new("b", 0, 0, 0),
            Position::new("a", 1, 0, 0),
            Position::new("a", 0, 5, 0),
            Position::new("a", 0, 0, -1),
        ];
        v.sort();
        assert_eq!(v, vec![
            Position::new("a", 0, 0, -1),
            Position::new("a", 0, 5, 0),
            Position::new("a", 1, 0, 0),
            Position::new("b", 0, 0, 0),
        ]);
    }
}
