//! Network construction: flood-filling components from connection masks.
//!
//! Topology is derived state. On load only the per-pipe masks exist; the
//! loader walks mutual connection bits outward from a pipe, creating a
//! network per component per substance and registering the machine points it
//! passes. A fill that reaches an already-loaded pipe absorbs that pipe's
//! whole network instead of re-walking it, so load order does not matter.
//!
//! In-progress fills are tracked by chunk. A load pass that finds its chunk
//! already claimed skips instead of blocking; the claim holder's fill reaches
//! everything the skipped pass would have built.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use slotmap::SlotMap;

use conduit_grid::{ChunkPos, NetworkId, PipeId, Position, Substance, TileGrid};

use crate::lock;
use crate::module::{NetError, PipeModule, absorb_locked};
use crate::network::{PipeNetwork, Point};
use crate::pipe::Pipe;
use crate::policy;

/// Membership of one chunk in the busy set, released on drop. The mutex is
/// only held for the insert and the remove, never across the fill.
pub(crate) struct ChunkClaim<'a> {
    busy: &'a Mutex<BTreeSet<ChunkPos>>,
    chunk: ChunkPos,
}

impl<'a> ChunkClaim<'a> {
    /// Claim a chunk, or `None` when another load pass already holds it.
    pub(crate) fn try_claim(
        busy: &'a Mutex<BTreeSet<ChunkPos>>,
        chunk: ChunkPos,
    ) -> Option<ChunkClaim<'a>> {
        lock::lock(busy).insert(chunk).then_some(ChunkClaim { busy, chunk })
    }
}

impl Drop for ChunkClaim<'_> {
    fn drop(&mut self) {
        lock::lock(self.busy).remove(&self.chunk);
    }
}

impl PipeModule {
    /// Load every unloaded substance slot of the pipe at `position` by flood
    /// filling its component. Returns false without doing anything when the
    /// pipe's chunk is claimed by a concurrent load pass.
    pub fn load_pipe(&self, world: &dyn TileGrid, position: Position) -> Result<bool, NetError> {
        let Some(_claim) = ChunkClaim::try_claim(&self.busy_chunks, position.chunk()) else {
            return Ok(false);
        };
        let pipes = lock::read(&self.pipes);
        let mut networks = lock::write(&self.networks);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
        fill_unloaded(world, &pipes, &mut networks, &index, pipe_id);
        Ok(true)
    }

    /// Load every pipe in a chunk. Returns false when the chunk is claimed by
    /// a concurrent load pass.
    pub fn load_chunk(&self, world: &dyn TileGrid, chunk: ChunkPos) -> bool {
        let Some(_claim) = ChunkClaim::try_claim(&self.busy_chunks, chunk) else {
            return false;
        };
        let pipes = lock::read(&self.pipes);
        let mut networks = lock::write(&self.networks);
        let index = lock::read(&self.index);
        let in_chunk: Vec<PipeId> = index
            .iter()
            .filter(|(position, _)| position.chunk() == chunk)
            .map(|(_, &pipe_id)| pipe_id)
            .collect();
        for pipe_id in in_chunk {
            fill_unloaded(world, &pipes, &mut networks, &index, pipe_id);
        }
        true
    }
}

fn fill_unloaded(
    world: &dyn TileGrid,
    pipes: &SlotMap<PipeId, Pipe>,
    networks: &mut SlotMap<NetworkId, PipeNetwork>,
    index: &BTreeMap<Position, PipeId>,
    pipe_id: PipeId,
) {
    let pipe = &pipes[pipe_id];
    for substance in Substance::all() {
        let unloaded = {
            let slot = lock::read(pipe.slot(substance));
            slot.present && slot.network.is_none()
        };
        if unloaded {
            flood_fill(world, pipes, networks, index, substance, pipe_id);
        }
    }
}

/// Build the network containing `start` for one substance.
///
/// BFS over mutual connection bits. Reaching a pipe that already belongs to
/// another network absorbs that network wholesale. Machine neighbors on
/// connected sides become insertion points, extraction points too where the
/// extractor bit is set.
pub(crate) fn flood_fill(
    world: &dyn TileGrid,
    pipes: &SlotMap<PipeId, Pipe>,
    networks: &mut SlotMap<NetworkId, PipeNetwork>,
    index: &BTreeMap<Position, PipeId>,
    substance: Substance,
    start: PipeId,
) -> NetworkId {
    let net_id = networks.insert_with_key(|id| PipeNetwork::new(id, substance));
    let mut drained: Vec<NetworkId> = Vec::new();
    {
        let net = &networks[net_id];
        let mut state = lock::write(&net.state);
        let mut queue = VecDeque::from([start]);
        while let Some(pipe_id) = queue.pop_front() {
            if state.members.contains(&pipe_id) {
                continue;
            }
            let Some(pipe) = pipes.get(pipe_id) else {
                continue;
            };
            if pipe.is_dying() {
                continue;
            }

            {
                let slot = lock::read(pipe.slot(substance));
                if !slot.present {
                    continue;
                }
                if let Some(other) = slot.network
                    && other != net_id
                {
                    drop(slot);
                    absorb_locked(pipes, networks, &mut state, net_id, other);
                    drained.push(other);
                    continue;
                }
            }

            lock::write(pipe.slot(substance)).network = Some(net_id);
            state.members.insert(pipe_id);

            let slot = lock::read(pipe.slot(substance));
            for direction in slot.connections.active() {
                let neighbor_pos = pipe.position().offset(direction);
                if let Some(&nid) = index.get(&neighbor_pos) {
                    if state.members.contains(&nid) {
                        continue;
                    }
                    let neighbor = &pipes[nid];
                    if neighbor.is_dying() {
                        continue;
                    }
                    let nslot = lock::read(neighbor.slot(substance));
                    if nslot.present && nslot.connections.contains(direction.opposite()) {
                        queue.push_back(nid);
                    }
                } else if let Some(tile) = world.tile_at(neighbor_pos)
                    && policy::substance_compatible(substance, tile)
                {
                    let point = Point {
                        position: neighbor_pos,
                        side: direction.opposite(),
                    };
                    state.insertions.insert(point);
                    if slot.extractors.contains(direction) {
                        state.extractions.insert(point);
                    }
                }
            }
        }
    }
    for drained_id in drained {
        networks.remove(drained_id);
    }
    net_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_grid::test_utils::{Machine, TestGrid};
    use conduit_grid::{Direction, EntityId};
    use crate::pipe::PipeSaveState;

    /// Saved masks for a pipe connected on the given sides, extractors on a
    /// subset of them.
    fn saved(substance: Substance, connected: &[Direction], extracting: &[Direction]) -> PipeSaveState {
        let mut state = PipeSaveState::default();
        let slot = &mut state.slots[substance.index()];
        slot.present = true;
        for &direction in connected {
            slot.connections.set(direction, true);
        }
        for &direction in extracting {
            slot.extractors.set(direction, true);
        }
        state
    }

    #[test]
    fn restore_rebuilds_one_component_regardless_of_order() {
        use Direction::{East, West};
        let mut grid = TestGrid::new();
        grid.place(Position::new(3, 0), Machine::new(1).with_inventory(10));

        let masks = [
            (Position::new(0, 0), saved(Substance::Item, &[East], &[])),
            (Position::new(1, 0), saved(Substance::Item, &[East, West], &[])),
            (Position::new(2, 0), saved(Substance::Item, &[East, West], &[])),
        ];

        // Every load order yields one 3-member network with the single
        // insertion point at the attached machine.
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 0, 1], [1, 2, 0]];
        for order in orders {
            let module = PipeModule::new();
            for (n, &i) in order.iter().enumerate() {
                let (position, ref state) = masks[i];
                module
                    .add_pipe_from_saved(&grid, position, EntityId(n as u64), state)
                    .unwrap();
            }
            assert_eq!(module.network_count(), 1, "order {order:?}");
            let net = module.network_of(Position::new(0, 0), Substance::Item).unwrap();
            assert_eq!(module.member_count(net), 3);
            assert_eq!(
                module.insertion_points(net),
                vec![Point {
                    position: Position::new(3, 0),
                    side: Direction::West
                }]
            );
        }
    }

    #[test]
    fn restore_registers_extraction_points() {
        let mut grid = TestGrid::new();
        grid.place(Position::new(-1, 0), Machine::new(1).with_inventory(10));

        let module = PipeModule::new();
        let state = saved(Substance::Item, &[Direction::West], &[Direction::West]);
        module
            .add_pipe_from_saved(&grid, Position::new(0, 0), EntityId(2), &state)
            .unwrap();

        let net = module.network_of(Position::new(0, 0), Substance::Item).unwrap();
        let point = Point {
            position: Position::new(-1, 0),
            side: Direction::East,
        };
        assert_eq!(module.insertion_points(net), vec![point]);
        assert_eq!(module.extraction_points(net), vec![point]);
    }

    #[test]
    fn one_sided_masks_do_not_join_components() {
        let grid = TestGrid::new();
        let module = PipeModule::new();
        module
            .add_pipe_from_saved(
                &grid,
                Position::new(0, 0),
                EntityId(1),
                &saved(Substance::Item, &[Direction::East], &[]),
            )
            .unwrap();
        // The neighbor never points back west.
        module
            .add_pipe_from_saved(
                &grid,
                Position::new(1, 0),
                EntityId(2),
                &saved(Substance::Item, &[Direction::East], &[]),
            )
            .unwrap();

        assert_eq!(module.network_count(), 2);
    }

    #[test]
    fn save_and_restore_round_trips_the_topology() {
        let mut grid = TestGrid::new();
        grid.place(Position::new(3, 0), Machine::new(1).with_inventory(10));

        let module = PipeModule::new();
        for x in 0..3 {
            module
                .add_pipe(&grid, Position::new(x, 0), EntityId(10 + x as u64), [Substance::Item])
                .unwrap();
        }
        for x in 0..2 {
            module
                .set_connection(&grid, Position::new(x, 0), Substance::Item, Direction::East, true)
                .unwrap();
            module
                .set_connection(&grid, Position::new(x + 1, 0), Substance::Item, Direction::West, true)
                .unwrap();
        }
        module
            .set_connection(&grid, Position::new(2, 0), Substance::Item, Direction::East, true)
            .unwrap();
        module
            .set_extractor(&grid, Position::new(2, 0), Substance::Item, Direction::East, true)
            .unwrap();

        let snapshot = module.save_state();
        let restored = PipeModule::new();
        for (i, (&position, state)) in snapshot.iter().enumerate() {
            restored
                .add_pipe_from_saved(&grid, position, EntityId(i as u64), state)
                .unwrap();
        }

        assert_eq!(restored.network_count(), 1);
        let net = restored.network_of(Position::new(1, 0), Substance::Item).unwrap();
        assert_eq!(restored.member_count(net), 3);
        let point = Point {
            position: Position::new(3, 0),
            side: Direction::West,
        };
        assert_eq!(restored.insertion_points(net), vec![point]);
        assert_eq!(restored.extraction_points(net), vec![point]);
    }

    #[test]
    fn busy_chunk_is_skipped_not_blocked() {
        let grid = TestGrid::new();
        let module = PipeModule::new();
        module
            .insert_pipe(
                Position::new(0, 0),
                Pipe::new(Position::new(0, 0), EntityId(1), [Substance::Item]),
            )
            .unwrap();

        let chunk = Position::new(0, 0).chunk();
        let claim = ChunkClaim::try_claim(&module.busy_chunks, chunk).unwrap();
        assert!(!module.load_pipe(&grid, Position::new(0, 0)).unwrap());
        assert!(!module.load_chunk(&grid, chunk));
        drop(claim);
        assert!(module.load_pipe(&grid, Position::new(0, 0)).unwrap());
        assert_eq!(module.network_count(), 1);
    }

    #[test]
    fn load_chunk_fills_only_that_chunk() {
        let grid = TestGrid::new();
        let module = PipeModule::new();
        // One pipe in chunk (0,0), one far away in chunk (2,0).
        module
            .insert_pipe(
                Position::new(1, 1),
                Pipe::new(Position::new(1, 1), EntityId(1), [Substance::Item]),
            )
            .unwrap();
        module
            .insert_pipe(
                Position::new(33, 1),
                Pipe::new(Position::new(33, 1), EntityId(2), [Substance::Item]),
            )
            .unwrap();

        assert!(module.load_chunk(&grid, Position::new(1, 1).chunk()));
        assert_eq!(module.network_count(), 1);
        assert!(module.network_of(Position::new(1, 1), Substance::Item).is_some());
        assert!(module.network_of(Position::new(33, 1), Substance::Item).is_none());
    }
}
