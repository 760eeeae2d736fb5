//! Conduit Grid -- shared grid and payload types for the pipe network subsystem.
//!
//! This crate is the leaf of the workspace: positions and chunk coordinates,
//! cardinal directions, the per-substance connection mask, substance and id
//! types, resource payloads, and the collaborator traits at the world
//! boundary (tile lookup, containers). It holds no network topology of its
//! own; `conduit-net` builds the live graph on top of these types.
//!
//! # Key Types
//!
//! - [`pos::Position`] -- A tile coordinate on the 2D world grid.
//! - [`pos::ChunkPos`] -- The 16x16 chunk a position belongs to.
//! - [`directions::DirectionSet`] -- 4-bit + center connection mask per
//!   substance per pipe, with toggle, query, and march index.
//! - [`substance::Substance`] -- Item, Fluid, Energy, or Data.
//! - [`container`] -- Substance-typed container traits: insert returns the
//!   rejected remainder, extract can peek or commit.
//! - [`tile::TileGrid`] -- Position -> tile-entity lookup provided by the
//!   world collaborator.

pub mod container;
pub mod directions;
pub mod fixed;
pub mod id;
pub mod pos;
pub mod substance;
pub mod tile;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use container::{
    DataMessage, DataReceiver, EnergyContainer, FluidContainer, FluidStack, ItemContainer,
    ItemStack,
};
pub use directions::DirectionSet;
pub use fixed::{Fixed64, Ticks};
pub use id::{EntityId, FluidTypeId, ItemTypeId, NetworkId, PipeId};
pub use pos::{ChunkPos, Direction, Position};
pub use substance::Substance;
pub use tile::{TileEntity, TileGrid};
