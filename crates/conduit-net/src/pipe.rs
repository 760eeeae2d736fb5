//! The pipe tile entity: per-substance connection state.
//!
//! A pipe carries up to four independent substances. Each substance slot
//! holds a connection mask, an extractor mask, a present flag, and the
//! network back-reference. Invariants:
//!
//! - the extractor mask is a subset of the connection mask;
//! - masks are only meaningful while `present` is true;
//! - `network.is_some()` is the "loaded" flag -- a slot with a network id is
//!   a member of exactly that network.
//!
//! Only [`PipeSaveState`] is serialized. Network ids are derived state,
//! rebuilt by the loader from the saved masks.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use conduit_grid::{DirectionSet, EntityId, NetworkId, Position, Substance};
use serde::{Deserialize, Serialize};

use crate::lock;

/// Per-substance connection state of one pipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeSlot {
    pub(crate) present: bool,
    pub(crate) connections: DirectionSet,
    pub(crate) extractors: DirectionSet,
    pub(crate) network: Option<NetworkId>,
}

/// A pipe tile. Lives in the module's pipe arena; the per-substance slots are
/// individually guarded so toggling one substance never blocks a concurrent
/// query of another.
#[derive(Debug)]
pub struct Pipe {
    pub(crate) position: Position,
    pub(crate) entity_id: EntityId,
    /// Set while the pipe is mid-removal; reachability BFS skips dying pipes.
    pub(crate) dying: AtomicBool,
    pub(crate) slots: [RwLock<PipeSlot>; 4],
}

impl Pipe {
    pub(crate) fn new(
        position: Position,
        entity_id: EntityId,
        substances: impl IntoIterator<Item = Substance>,
    ) -> Self {
        let pipe = Self {
            position,
            entity_id,
            dying: AtomicBool::new(false),
            slots: std::array::from_fn(|_| RwLock::new(PipeSlot::default())),
        };
        for substance in substances {
            lock::write(pipe.slot(substance)).present = true;
        }
        pipe
    }

    pub(crate) fn from_saved(position: Position, entity_id: EntityId, saved: &PipeSaveState) -> Self {
        let pipe = Self::new(position, entity_id, []);
        for substance in Substance::all() {
            let slot_saved = &saved.slots[substance.index()];
            let mut slot = lock::write(pipe.slot(substance));
            slot.present = slot_saved.present;
            if slot_saved.present {
                slot.connections = slot_saved.connections;
                // Extractors outside the connection mask would violate the
                // subset invariant; clip rather than trust the input.
                slot.extractors = slot_saved.extractors.intersect(&slot_saved.connections);
            }
        }
        pipe
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub(crate) fn slot(&self, substance: Substance) -> &RwLock<PipeSlot> {
        &self.slots[substance.index()]
    }

    pub(crate) fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dying(&self) {
        self.dying.store(true, Ordering::Release);
    }

    /// Snapshot the persisted state: present flags and masks, no topology.
    pub fn save_state(&self) -> PipeSaveState {
        let mut saved = PipeSaveState::default();
        for substance in Substance::all() {
            let slot = lock::read(self.slot(substance));
            saved.slots[substance.index()] = SlotSaveState {
                present: slot.present,
                connections: slot.connections,
                extractors: slot.extractors,
            };
        }
        saved
    }
}

/// Persisted state of one substance slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSaveState {
    pub present: bool,
    pub connections: DirectionSet,
    pub extractors: DirectionSet,
}

/// The wire/persistence form of a pipe: four slot snapshots.
///
/// This is the whole persistence boundary of the subsystem -- networks are
/// rebuilt from these masks on load, never serialized themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSaveState {
    pub slots: [SlotSaveState; 4],
}
