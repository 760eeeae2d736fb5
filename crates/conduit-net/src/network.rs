//! Connected-component networks and their per-substance policy state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use conduit_grid::{
    Direction, Fixed64, FluidTypeId, ItemStack, NetworkId, PipeId, Position, Substance, Ticks,
};

use crate::policy;

/// An insertion or extraction point: a machine tile position plus the
/// direction from that tile back toward the pipe that registered it.
///
/// The owning pipe is always at `position.offset(side)`, which is what lets
/// partition migrate points by membership without a reverse index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Point {
    pub position: Position,
    pub side: Direction,
}

impl Point {
    /// Position of the pipe this point hangs off.
    pub fn pipe_position(&self) -> Position {
        self.position.offset(self.side)
    }
}

/// Per-substance distribution state carried by a network.
///
/// One generic network type serves all four substances; the policy variant is
/// fixed at network creation and always matches the network's substance.
#[derive(Debug)]
pub(crate) enum Policy {
    Item {
        /// Round-robin position over the ordered insertion set. Monotonic;
        /// reduced modulo the current set size at use, so a shape change
        /// shifts but never resets the rotation.
        cursor: usize,
        /// Pulled but not yet delivered stacks, retried before any new
        /// extraction. Usually empty or a single stack; absorb can merge in
        /// another network's pending stack.
        overflow: Vec<ItemStack>,
    },
    Fluid {
        /// Undelivered fluid by type. Bounded to one transfer quantum: the
        /// network only pulls when this is empty.
        overflow: BTreeMap<FluidTypeId, Fixed64>,
    },
    Energy {
        /// Buffered energy, kept below `capacity`.
        buffer: Fixed64,
        /// Network-wide capacity, distinct from any machine's own capacity.
        /// Extraction is refused once the buffer reaches it.
        capacity: Fixed64,
    },
    /// Pure fan-out topology; no buffered state, no tick behavior.
    Data,
}

impl Policy {
    pub(crate) fn for_substance(substance: Substance) -> Policy {
        match substance {
            Substance::Item => Policy::Item {
                cursor: 0,
                overflow: Vec::new(),
            },
            Substance::Fluid => Policy::Fluid {
                overflow: BTreeMap::new(),
            },
            Substance::Energy => Policy::Energy {
                buffer: Fixed64::ZERO,
                capacity: policy::ENERGY_NETWORK_CAPACITY,
            },
            Substance::Data => Policy::Data,
        }
    }

    /// Merge another network's buffered state into this one. Called during
    /// absorb so no undelivered resource is dropped when components join.
    pub(crate) fn absorb(&mut self, other: &mut Policy) {
        match (self, other) {
            (Policy::Item { overflow, .. }, Policy::Item { overflow: from, .. }) => {
                overflow.append(from);
            }
            (Policy::Fluid { overflow }, Policy::Fluid { overflow: from }) => {
                for (fluid, amount) in std::mem::take(from) {
                    *overflow.entry(fluid).or_insert(Fixed64::ZERO) += amount;
                }
            }
            (Policy::Energy { buffer, .. }, Policy::Energy { buffer: from, .. }) => {
                *buffer += *from;
                *from = Fixed64::ZERO;
            }
            (Policy::Data, Policy::Data) => {}
            _ => unreachable!("networks of one substance share a policy variant"),
        }
    }
}

/// The guarded interior of a network.
pub(crate) struct NetState {
    pub(crate) members: BTreeSet<PipeId>,
    pub(crate) insertions: BTreeSet<Point>,
    pub(crate) extractions: BTreeSet<Point>,
    /// Last tick this network's distribution ran. The guard against fan-in:
    /// every member pipe requests a tick, only the first wins.
    pub(crate) last_tick: Option<Ticks>,
    pub(crate) policy: Policy,
}

impl NetState {
    pub(crate) fn new(substance: Substance) -> Self {
        Self {
            members: BTreeSet::new(),
            insertions: BTreeSet::new(),
            extractions: BTreeSet::new(),
            last_tick: None,
            policy: Policy::for_substance(substance),
        }
    }

    /// Monotonic tick-stamp comparison: true when this tick id has not been
    /// processed yet.
    pub(crate) fn can_tick(&self, tick: Ticks) -> bool {
        self.last_tick.is_none_or(|last| last < tick)
    }

    pub(crate) fn stamp(&mut self, tick: Ticks) {
        self.last_tick = Some(tick);
    }
}

/// A connected component of pipes for one substance, plus the insertion and
/// extraction points naming the machines it can push into or pull from.
pub struct PipeNetwork {
    id: NetworkId,
    substance: Substance,
    pub(crate) state: RwLock<NetState>,
}

impl PipeNetwork {
    pub(crate) fn new(id: NetworkId, substance: Substance) -> Self {
        Self {
            id,
            substance,
            state: RwLock::new(NetState::new(substance)),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn substance(&self) -> Substance {
        self.substance
    }
}

impl std::fmt::Debug for PipeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeNetwork")
            .field("id", &self.id)
            .field("substance", &self.substance)
            .finish_non_exhaustive()
    }
}
