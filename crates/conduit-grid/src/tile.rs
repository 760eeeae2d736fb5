use crate::container::{DataReceiver, EnergyContainer, FluidContainer, ItemContainer};
use crate::id::EntityId;
use crate::pos::Position;

/// A tile entity at some grid position, as seen by the pipe subsystem.
///
/// Machines expose whichever containers they have; the default accessors
/// return `None`. A tile with no matching container for a substance is not a
/// valid insertion or extraction point for that substance, and stale points
/// referring to such tiles are lazily purged.
pub trait TileEntity {
    /// Globally unique id, assigned by the world.
    fn entity_id(&self) -> EntityId;

    fn item_container(&self) -> Option<&dyn ItemContainer> {
        None
    }

    fn fluid_container(&self) -> Option<&dyn FluidContainer> {
        None
    }

    fn energy_container(&self) -> Option<&dyn EnergyContainer> {
        None
    }

    fn data_receiver(&self) -> Option<&dyn DataReceiver> {
        None
    }
}

/// The world collaborator: position -> tile-entity lookup.
///
/// Pipes themselves are tracked inside the pipe module's own position index;
/// this trait only needs to answer for machine tiles. All lookups are
/// in-memory and the grid is shared (`Sync`) across the sim and request
/// threads.
pub trait TileGrid: Sync {
    fn tile_at(&self, position: Position) -> Option<&dyn TileEntity>;
}
