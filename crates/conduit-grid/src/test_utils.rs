//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and downstream crates
//! (via the `test-utils` feature).
//!
//! [`TestGrid`] is a minimal world: a map of positions to [`Machine`]s.
//! Machines guard their container state with `RwLock`s, matching the
//! production contract that containers are shared across threads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::container::{
    DataMessage, DataReceiver, EnergyContainer, FluidContainer, FluidStack, ItemContainer,
    ItemStack,
};
use crate::fixed::Fixed64;
use crate::id::{EntityId, FluidTypeId, ItemTypeId};
use crate::pos::{Direction, Position};
use crate::tile::{TileEntity, TileGrid};

/// Fixed-point literal helper.
pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Containers
// ===========================================================================

/// An item inventory with a flat capacity and an optional type filter.
pub struct Inventory {
    capacity: u32,
    filter: Option<BTreeSet<ItemTypeId>>,
    stacks: RwLock<Vec<ItemStack>>,
}

impl Inventory {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            filter: None,
            stacks: RwLock::new(Vec::new()),
        }
    }

    fn total(&self) -> u32 {
        self.stacks.read().unwrap().iter().map(|s| s.quantity).sum()
    }

    fn quantity(&self, item_type: ItemTypeId) -> u32 {
        self.stacks
            .read()
            .unwrap()
            .iter()
            .find(|s| s.item_type == item_type)
            .map(|s| s.quantity)
            .unwrap_or(0)
    }

    fn stock(&self, item_type: ItemTypeId, quantity: u32) {
        let mut stacks = self.stacks.write().unwrap();
        if let Some(stack) = stacks.iter_mut().find(|s| s.item_type == item_type) {
            stack.quantity += quantity;
        } else {
            stacks.push(ItemStack::new(item_type, quantity));
        }
    }
}

impl ItemContainer for Inventory {
    fn can_insert(&self, stack: &ItemStack) -> bool {
        if let Some(filter) = &self.filter
            && !filter.contains(&stack.item_type)
        {
            return false;
        }
        self.total() < self.capacity
    }

    fn insert(&self, stack: ItemStack) -> Option<ItemStack> {
        if !self.can_insert(&stack) {
            return Some(stack);
        }
        let space = self.capacity.saturating_sub(self.total());
        let accepted = stack.quantity.min(space);
        let rejected = stack.quantity - accepted;
        if accepted > 0 {
            self.stock(stack.item_type, accepted);
        }
        (rejected > 0).then(|| ItemStack::new(stack.item_type, rejected))
    }

    fn extract(&self, _side: Direction, max: u32, commit: bool) -> Option<ItemStack> {
        let mut stacks = self.stacks.write().unwrap();
        let stack = stacks.iter_mut().find(|s| s.quantity > 0)?;
        let taken = stack.quantity.min(max);
        if taken == 0 {
            return None;
        }
        let item_type = stack.item_type;
        if commit {
            stack.quantity -= taken;
            stacks.retain(|s| s.quantity > 0);
        }
        Some(ItemStack::new(item_type, taken))
    }
}

/// A fluid tank with a total capacity shared across fluid types.
pub struct Tank {
    capacity: Fixed64,
    filter: Option<FluidTypeId>,
    contents: RwLock<BTreeMap<FluidTypeId, Fixed64>>,
}

impl Tank {
    fn new(capacity: Fixed64) -> Self {
        Self {
            capacity,
            filter: None,
            contents: RwLock::new(BTreeMap::new()),
        }
    }

    fn total(&self) -> Fixed64 {
        self.contents
            .read()
            .unwrap()
            .values()
            .fold(Fixed64::ZERO, |acc, v| acc + *v)
    }

    fn amount(&self, fluid_type: FluidTypeId) -> Fixed64 {
        self.contents
            .read()
            .unwrap()
            .get(&fluid_type)
            .copied()
            .unwrap_or(Fixed64::ZERO)
    }

    fn fill(&self, fluid_type: FluidTypeId, amount: Fixed64) {
        let mut contents = self.contents.write().unwrap();
        *contents.entry(fluid_type).or_insert(Fixed64::ZERO) += amount;
    }
}

impl FluidContainer for Tank {
    fn can_insert(&self, fluid_type: FluidTypeId) -> bool {
        if let Some(filter) = self.filter
            && filter != fluid_type
        {
            return false;
        }
        self.total() < self.capacity
    }

    fn insert(&self, fluid_type: FluidTypeId, amount: Fixed64) -> Fixed64 {
        if !self.can_insert(fluid_type) {
            return amount;
        }
        let headroom = self.capacity - self.total();
        let accepted = amount.min(headroom);
        if accepted > Fixed64::ZERO {
            self.fill(fluid_type, accepted);
        }
        amount - accepted
    }

    fn extract(&self, _side: Direction, max: Fixed64, commit: bool) -> Option<FluidStack> {
        let mut contents = self.contents.write().unwrap();
        let (&fluid_type, &available) = contents.iter().find(|(_, v)| **v > Fixed64::ZERO)?;
        let taken = available.min(max);
        if taken <= Fixed64::ZERO {
            return None;
        }
        if commit {
            let entry = contents.get_mut(&fluid_type).unwrap();
            *entry -= taken;
            if *entry <= Fixed64::ZERO {
                contents.remove(&fluid_type);
            }
        }
        Some(FluidStack::new(fluid_type, taken))
    }
}

/// An energy store with a charge clamped to [0, capacity].
pub struct Battery {
    capacity: Fixed64,
    charge: RwLock<Fixed64>,
}

impl Battery {
    fn new(capacity: Fixed64) -> Self {
        Self {
            capacity,
            charge: RwLock::new(Fixed64::ZERO),
        }
    }

    fn charge(&self) -> Fixed64 {
        *self.charge.read().unwrap()
    }
}

impl EnergyContainer for Battery {
    fn can_insert(&self) -> bool {
        self.charge() < self.capacity
    }

    fn insert(&self, amount: Fixed64) -> Fixed64 {
        let mut charge = self.charge.write().unwrap();
        let accepted = amount.min(self.capacity - *charge);
        *charge += accepted;
        amount - accepted
    }

    fn extract(&self, _side: Direction, max: Fixed64, commit: bool) -> Fixed64 {
        let mut charge = self.charge.write().unwrap();
        let taken = max.min(*charge);
        if commit {
            *charge -= taken;
        }
        taken
    }
}

/// Records every delivered data message.
#[derive(Default)]
pub struct Inbox {
    messages: RwLock<Vec<DataMessage>>,
}

impl DataReceiver for Inbox {
    fn receive(&self, message: &DataMessage) {
        self.messages.write().unwrap().push(message.clone());
    }
}

// ===========================================================================
// Machine
// ===========================================================================

/// A test tile entity exposing any combination of the four containers.
pub struct Machine {
    id: EntityId,
    inventory: Option<Inventory>,
    tank: Option<Tank>,
    battery: Option<Battery>,
    inbox: Option<Inbox>,
}

impl Machine {
    pub fn new(id: u64) -> Self {
        Self {
            id: EntityId(id),
            inventory: None,
            tank: None,
            battery: None,
            inbox: None,
        }
    }

    pub fn with_inventory(mut self, capacity: u32) -> Self {
        self.inventory = Some(Inventory::new(capacity));
        self
    }

    pub fn with_item_filter(mut self, types: impl IntoIterator<Item = ItemTypeId>) -> Self {
        if let Some(inventory) = &mut self.inventory {
            inventory.filter = Some(types.into_iter().collect());
        }
        self
    }

    pub fn with_tank(mut self, capacity: Fixed64) -> Self {
        self.tank = Some(Tank::new(capacity));
        self
    }

    pub fn with_fluid_filter(mut self, fluid_type: FluidTypeId) -> Self {
        if let Some(tank) = &mut self.tank {
            tank.filter = Some(fluid_type);
        }
        self
    }

    pub fn with_battery(mut self, capacity: Fixed64) -> Self {
        self.battery = Some(Battery::new(capacity));
        self
    }

    pub fn with_inbox(mut self) -> Self {
        self.inbox = Some(Inbox::default());
        self
    }

    // -- Preloading --

    pub fn stock_items(&self, item_type: ItemTypeId, quantity: u32) {
        self.inventory
            .as_ref()
            .expect("machine has no inventory")
            .stock(item_type, quantity);
    }

    pub fn fill_fluid(&self, fluid_type: FluidTypeId, amount: Fixed64) {
        self.tank
            .as_ref()
            .expect("machine has no tank")
            .fill(fluid_type, amount);
    }

    pub fn charge_battery(&self, amount: Fixed64) {
        let battery = self.battery.as_ref().expect("machine has no battery");
        *battery.charge.write().unwrap() += amount;
    }

    // -- Assertions --

    pub fn item_total(&self) -> u32 {
        self.inventory.as_ref().map(|i| i.total()).unwrap_or(0)
    }

    pub fn item_quantity(&self, item_type: ItemTypeId) -> u32 {
        self.inventory
            .as_ref()
            .map(|i| i.quantity(item_type))
            .unwrap_or(0)
    }

    pub fn fluid_total(&self) -> Fixed64 {
        self.tank.as_ref().map(|t| t.total()).unwrap_or(Fixed64::ZERO)
    }

    pub fn fluid_amount(&self, fluid_type: FluidTypeId) -> Fixed64 {
        self.tank
            .as_ref()
            .map(|t| t.amount(fluid_type))
            .unwrap_or(Fixed64::ZERO)
    }

    pub fn charge(&self) -> Fixed64 {
        self.battery
            .as_ref()
            .map(|b| b.charge())
            .unwrap_or(Fixed64::ZERO)
    }

    pub fn messages(&self) -> Vec<DataMessage> {
        self.inbox
            .as_ref()
            .map(|i| i.messages.read().unwrap().clone())
            .unwrap_or_default()
    }
}

impl TileEntity for Machine {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn item_container(&self) -> Option<&dyn ItemContainer> {
        self.inventory.as_ref().map(|i| i as &dyn ItemContainer)
    }

    fn fluid_container(&self) -> Option<&dyn FluidContainer> {
        self.tank.as_ref().map(|t| t as &dyn FluidContainer)
    }

    fn energy_container(&self) -> Option<&dyn EnergyContainer> {
        self.battery.as_ref().map(|b| b as &dyn EnergyContainer)
    }

    fn data_receiver(&self) -> Option<&dyn DataReceiver> {
        self.inbox.as_ref().map(|i| i as &dyn DataReceiver)
    }
}

// ===========================================================================
// TestGrid
// ===========================================================================

/// A minimal world grid: machines keyed by position.
#[derive(Default)]
pub struct TestGrid {
    tiles: BTreeMap<Position, Machine>,
}

impl TestGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&mut self, position: Position, machine: Machine) {
        self.tiles.insert(position, machine);
    }

    pub fn remove(&mut self, position: Position) -> Option<Machine> {
        self.tiles.remove(&position)
    }

    pub fn machine(&self, position: Position) -> &Machine {
        self.tiles.get(&position).expect("no machine at position")
    }
}

impl TileGrid for TestGrid {
    fn tile_at(&self, position: Position) -> Option<&dyn TileEntity> {
        self.tiles.get(&position).map(|m| m as &dyn TileEntity)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_insert_reports_remainder() {
        let machine = Machine::new(1).with_inventory(10);
        let inventory = machine.item_container().unwrap();

        let rejected = inventory.insert(ItemStack::new(ItemTypeId(0), 6));
        assert!(rejected.is_none());

        let rejected = inventory.insert(ItemStack::new(ItemTypeId(0), 6)).unwrap();
        assert_eq!(rejected.quantity, 2);
        assert_eq!(machine.item_total(), 10);
    }

    #[test]
    fn inventory_filter_rejects_whole_stack() {
        let machine = Machine::new(1)
            .with_inventory(10)
            .with_item_filter([ItemTypeId(0)]);
        let inventory = machine.item_container().unwrap();

        assert!(!inventory.can_insert(&ItemStack::new(ItemTypeId(1), 1)));
        let rejected = inventory.insert(ItemStack::new(ItemTypeId(1), 5)).unwrap();
        assert_eq!(rejected.quantity, 5);
        assert_eq!(machine.item_total(), 0);
    }

    #[test]
    fn inventory_peek_does_not_remove() {
        let machine = Machine::new(1).with_inventory(10);
        machine.stock_items(ItemTypeId(0), 4);
        let inventory = machine.item_container().unwrap();

        let peeked = inventory.extract(Direction::North, 8, false).unwrap();
        assert_eq!(peeked.quantity, 4);
        assert_eq!(machine.item_total(), 4);

        let taken = inventory.extract(Direction::North, 8, true).unwrap();
        assert_eq!(taken.quantity, 4);
        assert_eq!(machine.item_total(), 0);
    }

    #[test]
    fn tank_conserves_on_partial_insert() {
        let machine = Machine::new(1).with_tank(fixed(10.0));
        machine.fill_fluid(FluidTypeId(0), fixed(8.0));
        let tank = machine.fluid_container().unwrap();

        let rejected = tank.insert(FluidTypeId(0), fixed(5.0));
        assert_eq!(rejected, fixed(3.0));
        assert_eq!(machine.fluid_total(), fixed(10.0));
    }

    #[test]
    fn battery_clamps_to_capacity() {
        let machine = Machine::new(1).with_battery(fixed(100.0));
        let battery = machine.energy_container().unwrap();

        assert_eq!(battery.insert(fixed(120.0)), fixed(20.0));
        assert!(!battery.can_insert());
        assert_eq!(battery.extract(Direction::East, fixed(30.0), true), fixed(30.0));
        assert_eq!(machine.charge(), fixed(70.0));
    }

    #[test]
    fn inbox_records_messages() {
        let machine = Machine::new(1).with_inbox();
        let receiver = machine.data_receiver().unwrap();
        receiver.receive(&DataMessage::new("ping", fixed(1.0)));
        assert_eq!(machine.messages().len(), 1);
        assert_eq!(machine.messages()[0].name, "ping");
    }

    #[test]
    fn grid_lookup() {
        let mut grid = TestGrid::new();
        grid.place(Position::new(2, 3), Machine::new(9).with_inventory(1));
        assert!(grid.tile_at(Position::new(2, 3)).is_some());
        assert!(grid.tile_at(Position::new(0, 0)).is_none());
        assert_eq!(grid.tile_at(Position::new(2, 3)).unwrap().entity_id(), EntityId(9));
    }
}
