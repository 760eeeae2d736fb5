//! Conduit Net -- the live pipe network subsystem.
//!
//! Adjacent pipe tiles carrying one of four substances (item, fluid, energy,
//! data) self-organize into connected-component networks that route resources
//! between machines on the world grid. The graph mutates as connections are
//! toggled and pipes are placed or removed, and must stay correctly
//! partitioned while the simulation thread ticks it and request threads query
//! it concurrently.
//!
//! # Architecture
//!
//! - Pipes and networks live in [`slotmap`] arenas inside [`module::PipeModule`];
//!   membership and insertion/extraction point sets are id-sets, so merge and
//!   partition are pure set operations with no weak-reference bookkeeping.
//! - One network type serves all four substances; the per-substance
//!   distribution state (round-robin cursor, overflow buffers, energy buffer)
//!   is a policy enum inside the network state.
//! - [`loader`] flood-fills networks from per-pipe connection masks. Topology
//!   is derived state: only the masks persist ([`pipe::PipeSaveState`]), and
//!   every network is rebuilt on load.
//!
//! # Tick pipeline
//!
//! Each simulation tick, every loaded pipe asks its networks to tick; a
//! tick-stamp guard collapses the fan-in so each network distributes exactly
//! once per tick. A network tick first drains buffered resource toward its
//! insertion points, then pulls fresh supply from its extraction points.
//!
//! # Locking
//!
//! Lock acquisition order, outermost first: pipe arena, network arena,
//! position index, network state, pipe slot, busy-chunk set. Structural
//! mutations (connection toggles, absorb, partition, pipe add/remove) are
//! driven by the single simulation context per realm; request threads only
//! take read locks. Cross-network state locks (absorb, partition) rely on
//! that single-mutator contract rather than an id ordering.

pub mod loader;
pub mod module;
pub mod network;
pub mod pipe;
pub mod policy;

pub(crate) mod lock;

pub use module::{NetError, PipeModule};
pub use network::{PipeNetwork, Point};
pub use pipe::{PipeSaveState, SlotSaveState};
pub use policy::{ENERGY_NETWORK_CAPACITY, ENERGY_TRANSFER_PER_TICK, FLUID_TRANSFER_PER_TICK, ITEM_PULL_MAX};
