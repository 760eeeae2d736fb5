use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a pipe tile in the pipe arena.
    pub struct PipeId;

    /// Identifies a connected-component network in the network arena.
    pub struct NetworkId;
}

/// Identifies an item type. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemTypeId(pub u32);

/// Identifies a fluid type. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FluidTypeId(pub u32);

/// Globally unique id of a tile entity, assigned by the world.
///
/// Data fan-out deduplicates deliveries by this id, so one machine that is
/// reachable through several insertion/extraction points receives a message
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);
