use crate::pos::Direction;
use serde::{Deserialize, Serialize};

/// Per-substance connection mask for one pipe tile: one bit per cardinal
/// direction plus a center bit.
///
/// Each substance on a pipe carries two of these independently: the
/// connection mask (which sides link to neighbors) and the extractor mask
/// (which connected sides pull from the neighbor instead of pushing into it).
///
/// Serialized as the raw `u8` -- this mask, together with the per-substance
/// present flags, is the *only* pipe state that persists. Network topology is
/// rebuilt from masks on load, never saved.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DirectionSet {
    bits: u8,
}

const CENTER_BIT: u8 = 1 << 4;
const DIRECTION_MASK: u8 = 0b1111;

impl DirectionSet {
    /// The empty mask: no directions, no center.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a direction bit is set.
    pub fn contains(&self, direction: Direction) -> bool {
        self.bits & (1 << direction.index()) != 0
    }

    /// Set or clear a direction bit.
    pub fn set(&mut self, direction: Direction, enabled: bool) {
        if enabled {
            self.bits |= 1 << direction.index();
        } else {
            self.bits &= !(1 << direction.index());
        }
    }

    /// Flip a direction bit, returning its new state.
    pub fn toggle(&mut self, direction: Direction) -> bool {
        self.bits ^= 1 << direction.index();
        self.contains(direction)
    }

    /// Toggle by click-quadrant index: 0..=3 map onto N/E/S/W, 4 toggles the
    /// center flag. Out-of-range indices are ignored and return false.
    pub fn toggle_index(&mut self, index: u8) -> bool {
        if index == 4 {
            self.bits ^= CENTER_BIT;
            return self.center();
        }
        match Direction::from_index(index) {
            Some(direction) => self.toggle(direction),
            None => false,
        }
    }

    /// Whether the center flag is set.
    pub fn center(&self) -> bool {
        self.bits & CENTER_BIT != 0
    }

    /// Set or clear the center flag.
    pub fn set_center(&mut self, enabled: bool) {
        if enabled {
            self.bits |= CENTER_BIT;
        } else {
            self.bits &= !CENTER_BIT;
        }
    }

    /// Active directions in mask-bit order (N, E, S, W).
    pub fn active(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::all().into_iter().filter(|d| self.contains(*d))
    }

    /// Number of active directions. The center flag does not count.
    pub fn len(&self) -> u32 {
        (self.bits & DIRECTION_MASK).count_ones()
    }

    /// True when no direction bit is set. The center flag does not count.
    pub fn is_empty(&self) -> bool {
        self.bits & DIRECTION_MASK == 0
    }

    /// Marching-squares index for sprite selection: the raw 4-bit direction
    /// mask, 0..=15. Consumed by the rendering collaborator only.
    pub fn march_index(&self) -> u8 {
        self.bits & DIRECTION_MASK
    }

    /// True if every direction set here is also set in `other`.
    pub fn is_subset_of(&self, other: &DirectionSet) -> bool {
        (self.bits & DIRECTION_MASK) & !(other.bits & DIRECTION_MASK) == 0
    }

    /// Intersect with another mask, direction bits only.
    pub fn intersect(&self, other: &DirectionSet) -> DirectionSet {
        DirectionSet {
            bits: self.bits & other.bits & DIRECTION_MASK,
        }
    }
}
