use crate::fixed::Fixed64;
use crate::id::{FluidTypeId, ItemTypeId};
use crate::pos::Direction;
use serde::{Deserialize, Serialize};

/// A stack of fungible items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_type: ItemTypeId,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(item_type: ItemTypeId, quantity: u32) -> Self {
        Self {
            item_type,
            quantity,
        }
    }
}

/// An amount of one fluid type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluidStack {
    pub fluid_type: FluidTypeId,
    pub amount: Fixed64,
}

impl FluidStack {
    pub fn new(fluid_type: FluidTypeId, amount: Fixed64) -> Self {
        Self { fluid_type, amount }
    }
}

/// A named message payload delivered through data networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    pub name: String,
    pub value: Fixed64,
}

impl DataMessage {
    pub fn new(name: impl Into<String>, value: Fixed64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Container traits
// ---------------------------------------------------------------------------
//
// All container methods take `&self`: the world is shared between the sim
// thread and request threads, so implementations guard their own state
// (interior mutability). Network code never inspects container internals --
// insert reports the rejected remainder, extract can peek (`commit = false`)
// or remove (`commit = true`).

/// An item inventory a network can push into or pull from.
pub trait ItemContainer {
    /// Whether this inventory would accept any part of `stack`. Item filters
    /// live behind this predicate.
    fn can_insert(&self, stack: &ItemStack) -> bool;

    /// Insert a stack. Returns the rejected remainder, `None` when fully
    /// accepted.
    fn insert(&self, stack: ItemStack) -> Option<ItemStack>;

    /// Extract up to `max` items through the given side. With `commit` false
    /// the inventory is left untouched (a peek).
    fn extract(&self, side: Direction, max: u32, commit: bool) -> Option<ItemStack>;
}

/// A fluid tank a network can push into or pull from.
pub trait FluidContainer {
    /// Whether this tank would accept any amount of the given fluid type.
    fn can_insert(&self, fluid_type: FluidTypeId) -> bool;

    /// Insert an amount of fluid. Returns the rejected amount (zero when
    /// fully accepted).
    fn insert(&self, fluid_type: FluidTypeId, amount: Fixed64) -> Fixed64;

    /// Extract up to `max` fluid through the given side.
    fn extract(&self, side: Direction, max: Fixed64, commit: bool) -> Option<FluidStack>;
}

/// An energy store a network can push into or pull from.
pub trait EnergyContainer {
    /// Whether this store has headroom for more energy.
    fn can_insert(&self) -> bool;

    /// Insert an amount of energy. Returns the rejected amount.
    fn insert(&self, amount: Fixed64) -> Fixed64;

    /// Extract up to `max` energy through the given side. Returns the amount
    /// actually removed (zero when empty).
    fn extract(&self, side: Direction, max: Fixed64, commit: bool) -> Fixed64;
}

/// A tile entity that accepts data messages.
pub trait DataReceiver {
    /// Deliver a message. Synchronous; called once per broadcast per entity.
    fn receive(&self, message: &DataMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_stack_construction() {
        let stack = ItemStack::new(ItemTypeId(2), 16);
        assert_eq!(stack.item_type, ItemTypeId(2));
        assert_eq!(stack.quantity, 16);
    }

    #[test]
    fn payloads_are_serializable() {
        fn assert_serde<T: serde::Serialize + serde::de::DeserializeOwned>() {}
        assert_serde::<ItemStack>();
        assert_serde::<FluidStack>();
        assert_serde::<DataMessage>();
    }
}
