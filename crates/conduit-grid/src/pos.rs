use serde::{Deserialize, Serialize};

/// Side length of a chunk in tiles.
pub const CHUNK_SIZE: i32 = 16;

/// A position on the 2D world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighboring position one tile in the given direction.
    pub fn offset(&self, direction: Direction) -> Position {
        let (dx, dy) = direction.offset();
        Position::new(self.x + dx, self.y + dy)
    }

    /// Manhattan distance to another position.
    pub fn manhattan_distance(&self, other: &Position) -> u32 {
        (self.x - other.x).unsigned_abs() + (self.y - other.y).unsigned_abs()
    }

    /// The chunk this position belongs to. Arithmetic shift, so negative
    /// coordinates map into the correct chunk (-1 is in chunk -1, not 0).
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            y: self.y >> 4,
        }
    }
}

/// A chunk coordinate: the grid partitioned into 16x16 tile blocks.
///
/// Flood fill tracks in-progress chunks by this key so two concurrent load
/// passes never race over the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

/// Cardinal directions, in mask-bit order (N, E, S, W).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All four cardinal directions, in mask-bit order.
    pub fn all() -> [Direction; 4] {
        [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ]
    }

    /// Offset for this direction. North is -y, matching screen coordinates.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// The direction pointing back: a connection A -> B in direction D is
    /// mutual only if B has `D.opposite()` set.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    /// Mask-bit index: N=0, E=1, S=2, W=3.
    pub fn index(&self) -> u8 {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }

    /// Inverse of [`Direction::index`]. Used by the interaction layer to map
    /// a click quadrant onto a direction toggle.
    pub fn from_index(index: u8) -> Option<Direction> {
        match index {
            0 => Some(Direction::North),
            1 => Some(Direction::East),
            2 => Some(Direction::South),
            3 => Some(Direction::West),
            _ => None,
        }
    }
}
