//! The pipe module facade: arenas, position index, and every structural
//! operation on the live graph.
//!
//! All operations take `&self`; interior locks guard the arenas and each
//! network's state. Structural mutations (connection toggles, pipe add and
//! remove) are driven by the single simulation context per realm, so
//! cross-network lock acquisition needs no id ordering. Request threads use
//! the query methods, which only ever take read locks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, RwLock};

use slotmap::SlotMap;
use thiserror::Error;

use conduit_grid::{
    ChunkPos, DataMessage, Direction, DirectionSet, EntityId, NetworkId, PipeId, Position,
    Substance, Ticks, TileGrid,
};

use crate::lock;
use crate::network::{NetState, PipeNetwork, Point};
use crate::pipe::{Pipe, PipeSaveState};
use crate::policy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("a pipe already occupies ({}, {})", .0.x, .0.y)]
    PositionOccupied(Position),
    #[error("no pipe at ({}, {})", .0.x, .0.y)]
    NoPipeAt(Position),
    #[error("pipe at ({}, {}) does not carry {substance:?}", position.x, position.y)]
    SubstanceNotPresent {
        position: Position,
        substance: Substance,
    },
    #[error("pipe at ({}, {}) has no {substance:?} connection toward {direction:?}", position.x, position.y)]
    NotConnected {
        position: Position,
        substance: Substance,
        direction: Direction,
    },
}

/// Owner of every pipe and network.
///
/// Lock order, outermost first: `pipes`, `networks`, `index`, a network's
/// state, a pipe's slot, `busy_chunks`. Guards on later locks are never held
/// while acquiring an earlier one.
pub struct PipeModule {
    pub(crate) pipes: RwLock<SlotMap<PipeId, Pipe>>,
    pub(crate) networks: RwLock<SlotMap<NetworkId, PipeNetwork>>,
    pub(crate) index: RwLock<BTreeMap<Position, PipeId>>,
    pub(crate) busy_chunks: Mutex<BTreeSet<ChunkPos>>,
}

impl Default for PipeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeModule {
    pub fn new() -> Self {
        Self {
            pipes: RwLock::new(SlotMap::with_key()),
            networks: RwLock::new(SlotMap::with_key()),
            index: RwLock::new(BTreeMap::new()),
            busy_chunks: Mutex::new(BTreeSet::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Pipe lifecycle
    // -----------------------------------------------------------------------

    /// Place a new pipe carrying the given substances and load it.
    pub fn add_pipe(
        &self,
        world: &dyn TileGrid,
        position: Position,
        entity_id: EntityId,
        substances: impl IntoIterator<Item = Substance>,
    ) -> Result<PipeId, NetError> {
        let pipe_id = self.insert_pipe(position, Pipe::new(position, entity_id, substances))?;
        self.load_pipe(world, position)?;
        Ok(pipe_id)
    }

    /// Restore a pipe from its persisted masks and load it. Networks are
    /// never persisted; this rebuilds them from the masks.
    pub fn add_pipe_from_saved(
        &self,
        world: &dyn TileGrid,
        position: Position,
        entity_id: EntityId,
        saved: &PipeSaveState,
    ) -> Result<PipeId, NetError> {
        let pipe_id = self.insert_pipe(position, Pipe::from_saved(position, entity_id, saved))?;
        self.load_pipe(world, position)?;
        Ok(pipe_id)
    }

    pub(crate) fn insert_pipe(&self, position: Position, pipe: Pipe) -> Result<PipeId, NetError> {
        let mut pipes = lock::write(&self.pipes);
        let mut index = lock::write(&self.index);
        if index.contains_key(&position) {
            return Err(NetError::PositionOccupied(position));
        }
        let pipe_id = pipes.insert(pipe);
        index.insert(position, pipe_id);
        Ok(pipe_id)
    }

    /// Remove the pipe at `position`, detaching it from its networks and
    /// splitting any component the removal disconnected.
    pub fn remove_pipe(&self, position: Position) -> Result<(), NetError> {
        struct Severed {
            substance: Substance,
            net: NetworkId,
            neighbors: Vec<PipeId>,
            points: Vec<Point>,
        }

        // Phase 1: mark the pipe dying so concurrent traversals skip it, and
        // snapshot what the removal severs per substance.
        let (pipe_id, severed) = {
            let pipes = lock::read(&self.pipes);
            let index = lock::read(&self.index);
            let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
            let pipe = &pipes[pipe_id];
            pipe.mark_dying();

            let mut severed = Vec::new();
            for substance in Substance::all() {
                let slot = lock::read(pipe.slot(substance));
                if !slot.present {
                    continue;
                }
                let Some(net) = slot.network else { continue };
                let mut neighbors = Vec::new();
                let mut points = Vec::new();
                for direction in slot.connections.active() {
                    let neighbor_pos = position.offset(direction);
                    if let Some(&nid) = index.get(&neighbor_pos) {
                        let neighbor = &pipes[nid];
                        if neighbor.is_dying() {
                            continue;
                        }
                        let nslot = lock::read(neighbor.slot(substance));
                        if nslot.present
                            && nslot.connections.contains(direction.opposite())
                            && nslot.network == Some(net)
                        {
                            neighbors.push(nid);
                        }
                    } else {
                        points.push(Point {
                            position: neighbor_pos,
                            side: direction.opposite(),
                        });
                    }
                }
                severed.push(Severed {
                    substance,
                    net,
                    neighbors,
                    points,
                });
            }
            (pipe_id, severed)
        };

        // Phase 2: detach from each network, drop networks left empty, and
        // split remaining fragments that are no longer connected.
        {
            let pipes = lock::read(&self.pipes);
            let mut networks = lock::write(&self.networks);
            let index = lock::read(&self.index);
            for ctx in &severed {
                let mut emptied = false;
                if let Some(net) = networks.get(ctx.net) {
                    let mut state = lock::write(&net.state);
                    state.members.remove(&pipe_id);
                    for point in &ctx.points {
                        state.insertions.remove(point);
                        state.extractions.remove(point);
                    }
                    emptied = state.members.is_empty();
                } else {
                    continue;
                }
                if emptied {
                    networks.remove(ctx.net);
                    continue;
                }

                let mut reached: BTreeSet<PipeId> = BTreeSet::new();
                for &nid in &ctx.neighbors {
                    if reached.contains(&nid) {
                        continue;
                    }
                    let component = component_from(&pipes, &index, ctx.substance, nid);
                    if reached.is_empty() {
                        // The first fragment keeps the existing network.
                        reached = component;
                    } else {
                        partition_locked(&pipes, &mut networks, ctx.substance, ctx.net, &component);
                        reached.extend(component);
                    }
                }
            }
        }

        // Phase 3: drop the pipe itself.
        let mut pipes = lock::write(&self.pipes);
        let mut index = lock::write(&self.index);
        index.remove(&position);
        pipes.remove(pipe_id);
        Ok(())
    }

    /// Snapshot every pipe's persisted form, keyed by position.
    pub fn save_state(&self) -> BTreeMap<Position, PipeSaveState> {
        let pipes = lock::read(&self.pipes);
        pipes
            .values()
            .map(|pipe| (pipe.position(), pipe.save_state()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Edge mutation
    // -----------------------------------------------------------------------

    /// Set or clear one substance's connection bit toward `direction`.
    ///
    /// Enabling an edge toward a mutually-connected pipe merges the two
    /// components; enabling it toward a compatible machine registers an
    /// insertion point. Disabling an edge splits the component when the
    /// neighbor pipe is no longer reachable, or re-validates the machine
    /// points at the neighbor position.
    pub fn set_connection(
        &self,
        world: &dyn TileGrid,
        position: Position,
        substance: Substance,
        direction: Direction,
        enabled: bool,
    ) -> Result<(), NetError> {
        let pipes = lock::read(&self.pipes);
        let mut networks = lock::write(&self.networks);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
        let pipe = &pipes[pipe_id];

        let net_id = {
            let mut slot = lock::write(pipe.slot(substance));
            if !slot.present {
                return Err(NetError::SubstanceNotPresent {
                    position,
                    substance,
                });
            }
            if slot.connections.contains(direction) == enabled {
                return Ok(());
            }
            slot.connections.set(direction, enabled);
            if !enabled {
                // Extractors are a subset of connections.
                slot.extractors.set(direction, false);
            }
            slot.network
        };
        let Some(net_id) = net_id else {
            // Unloaded slot: topology is rebuilt when the pipe loads.
            return Ok(());
        };

        let neighbor_pos = position.offset(direction);
        let neighbor_pipe = index.get(&neighbor_pos).copied();

        if enabled {
            if let Some(nid) = neighbor_pipe {
                let neighbor = &pipes[nid];
                let (mutual, neighbor_net) = {
                    let nslot = lock::read(neighbor.slot(substance));
                    (
                        nslot.present
                            && nslot.connections.contains(direction.opposite())
                            && !neighbor.is_dying(),
                        nslot.network,
                    )
                };
                if mutual {
                    match neighbor_net {
                        Some(other) if other != net_id => {
                            {
                                let target = &networks[net_id];
                                let mut state = lock::write(&target.state);
                                absorb_locked(&pipes, &networks, &mut state, net_id, other);
                            }
                            networks.remove(other);
                        }
                        Some(_) => {}
                        None => {
                            // Unloaded neighbor: fill from it. The fill
                            // reaches this pipe through the new edge and
                            // absorbs its network into the fresh one.
                            crate::loader::flood_fill(
                                world,
                                &pipes,
                                &mut networks,
                                &index,
                                substance,
                                nid,
                            );
                        }
                    }
                }
            } else if let Some(tile) = world.tile_at(neighbor_pos)
                && policy::substance_compatible(substance, tile)
            {
                let point = Point {
                    position: neighbor_pos,
                    side: direction.opposite(),
                };
                let net = &networks[net_id];
                lock::write(&net.state).insertions.insert(point);
            }
        } else if let Some(nid) = neighbor_pipe {
            let had_edge = {
                let nslot = lock::read(pipes[nid].slot(substance));
                nslot.present
                    && nslot.connections.contains(direction.opposite())
                    && nslot.network == Some(net_id)
            };
            if had_edge {
                let ours = component_from(&pipes, &index, substance, pipe_id);
                if !ours.contains(&nid) {
                    let moved = component_from(&pipes, &index, substance, nid);
                    partition_locked(&pipes, &mut networks, substance, net_id, &moved);
                }
            }
        } else {
            reconsider_points_locked(world, &pipes, &networks, &index, neighbor_pos);
        }
        Ok(())
    }

    /// Click-quadrant hook: indices 0..=3 toggle the matching direction's
    /// connection, 4 toggles the center flag (a visual marker, no topology).
    /// Returns the new state of the toggled bit; out-of-range indices are
    /// ignored.
    pub fn toggle_connection(
        &self,
        world: &dyn TileGrid,
        position: Position,
        substance: Substance,
        quadrant: u8,
    ) -> Result<bool, NetError> {
        if quadrant == 4 {
            let pipes = lock::read(&self.pipes);
            let index = lock::read(&self.index);
            let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
            let mut slot = lock::write(pipes[pipe_id].slot(substance));
            if !slot.present {
                return Err(NetError::SubstanceNotPresent {
                    position,
                    substance,
                });
            }
            let center = !slot.connections.center();
            slot.connections.set_center(center);
            return Ok(center);
        }
        let Some(direction) = Direction::from_index(quadrant) else {
            return Ok(false);
        };
        let enabled = {
            let pipes = lock::read(&self.pipes);
            let index = lock::read(&self.index);
            let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
            let slot = lock::read(pipes[pipe_id].slot(substance));
            if !slot.present {
                return Err(NetError::SubstanceNotPresent {
                    position,
                    substance,
                });
            }
            !slot.connections.contains(direction)
        };
        self.set_connection(world, position, substance, direction, enabled)?;
        Ok(enabled)
    }

    /// Set or clear the extractor flag on an already-connected direction.
    /// Registers or deregisters the extraction point at the neighbor without
    /// touching connection topology.
    pub fn set_extractor(
        &self,
        world: &dyn TileGrid,
        position: Position,
        substance: Substance,
        direction: Direction,
        enabled: bool,
    ) -> Result<(), NetError> {
        let pipes = lock::read(&self.pipes);
        let networks = lock::read(&self.networks);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position).ok_or(NetError::NoPipeAt(position))?;
        let pipe = &pipes[pipe_id];

        let net_id = {
            let mut slot = lock::write(pipe.slot(substance));
            if !slot.present {
                return Err(NetError::SubstanceNotPresent {
                    position,
                    substance,
                });
            }
            if !slot.connections.contains(direction) {
                return Err(NetError::NotConnected {
                    position,
                    substance,
                    direction,
                });
            }
            slot.extractors.set(direction, enabled);
            slot.network
        };

        let neighbor_pos = position.offset(direction);
        if let Some(net_id) = net_id
            && let Some(net) = networks.get(net_id)
            && index.get(&neighbor_pos).is_none()
        {
            let point = Point {
                position: neighbor_pos,
                side: direction.opposite(),
            };
            let mut state = lock::write(&net.state);
            if enabled {
                if world
                    .tile_at(neighbor_pos)
                    .is_some_and(|tile| policy::substance_compatible(substance, tile))
                {
                    state.extractions.insert(point);
                }
            } else {
                state.extractions.remove(&point);
            }
        }
        Ok(())
    }

    /// Re-validate or drop the insertion and extraction points at a position
    /// whose tile entity changed.
    pub fn reconsider_points(&self, world: &dyn TileGrid, position: Position) {
        let pipes = lock::read(&self.pipes);
        let networks = lock::read(&self.networks);
        let index = lock::read(&self.index);
        reconsider_points_locked(world, &pipes, &networks, &index, position);
    }

    // -----------------------------------------------------------------------
    // Tick and broadcast
    // -----------------------------------------------------------------------

    /// Run one simulation tick. Every loaded pipe asks its networks to tick;
    /// the per-network tick stamp collapses the fan-in so each network
    /// distributes exactly once per tick id.
    pub fn tick(&self, world: &dyn TileGrid, tick: Ticks) {
        let pipes = lock::read(&self.pipes);
        let networks = lock::read(&self.networks);
        for pipe in pipes.values() {
            if pipe.is_dying() {
                continue;
            }
            for substance in Substance::all() {
                let net_id = {
                    let slot = lock::read(pipe.slot(substance));
                    if !slot.present {
                        continue;
                    }
                    slot.network
                };
                let Some(net_id) = net_id else { continue };
                let Some(net) = networks.get(net_id) else {
                    continue;
                };
                let mut state = lock::write(&net.state);
                if !state.can_tick(tick) {
                    continue;
                }
                state.stamp(tick);
                match substance {
                    Substance::Item => policy::tick_item(world, &mut state),
                    Substance::Fluid => policy::tick_fluid(world, &mut state),
                    Substance::Energy => policy::tick_energy(world, &mut state),
                    // Data networks have no tick behavior; delivery is
                    // event-driven through broadcast.
                    Substance::Data => {}
                }
            }
        }
    }

    /// Deliver a message from the tile at `source` to every distinct machine
    /// on every data network one pipe hop away. Deduplicated by entity id
    /// across overlapping network membership; the source never receives its
    /// own message. Returns the number of machines reached.
    pub fn broadcast(&self, world: &dyn TileGrid, source: Position, message: &DataMessage) -> usize {
        let source_entity = world.tile_at(source).map(|tile| tile.entity_id());
        let pipes = lock::read(&self.pipes);
        let networks = lock::read(&self.networks);
        let index = lock::read(&self.index);

        let mut reached: BTreeSet<NetworkId> = BTreeSet::new();
        for direction in Direction::all() {
            let Some(&pid) = index.get(&source.offset(direction)) else {
                continue;
            };
            let pipe = &pipes[pid];
            if pipe.is_dying() {
                continue;
            }
            let slot = lock::read(pipe.slot(Substance::Data));
            if slot.present
                && slot.connections.contains(direction.opposite())
                && let Some(net_id) = slot.network
            {
                reached.insert(net_id);
            }
        }

        let mut delivered: BTreeSet<EntityId> = BTreeSet::new();
        for net_id in reached {
            let Some(net) = networks.get(net_id) else {
                continue;
            };
            let state = lock::read(&net.state);
            for point in state.insertions.iter().chain(state.extractions.iter()) {
                let Some(tile) = world.tile_at(point.position) else {
                    continue;
                };
                let entity = tile.entity_id();
                if Some(entity) == source_entity || delivered.contains(&entity) {
                    continue;
                }
                let Some(receiver) = tile.data_receiver() else {
                    continue;
                };
                receiver.receive(message);
                delivered.insert(entity);
            }
        }
        delivered.len()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn pipe_at(&self, position: Position) -> Option<PipeId> {
        lock::read(&self.index).get(&position).copied()
    }

    pub fn pipe_count(&self) -> usize {
        lock::read(&self.pipes).len()
    }

    pub fn network_count(&self) -> usize {
        lock::read(&self.networks).len()
    }

    pub fn network_of(&self, position: Position, substance: Substance) -> Option<NetworkId> {
        let pipes = lock::read(&self.pipes);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position)?;
        let slot = lock::read(pipes[pipe_id].slot(substance));
        if slot.present { slot.network } else { None }
    }

    pub fn network_substance(&self, net_id: NetworkId) -> Option<Substance> {
        lock::read(&self.networks)
            .get(net_id)
            .map(|net| net.substance())
    }

    pub fn members(&self, net_id: NetworkId) -> Vec<PipeId> {
        let networks = lock::read(&self.networks);
        networks
            .get(net_id)
            .map(|net| lock::read(&net.state).members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, net_id: NetworkId) -> usize {
        let networks = lock::read(&self.networks);
        networks
            .get(net_id)
            .map(|net| lock::read(&net.state).members.len())
            .unwrap_or(0)
    }

    pub fn insertion_points(&self, net_id: NetworkId) -> Vec<Point> {
        let networks = lock::read(&self.networks);
        networks
            .get(net_id)
            .map(|net| lock::read(&net.state).insertions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn extraction_points(&self, net_id: NetworkId) -> Vec<Point> {
        let networks = lock::read(&self.networks);
        networks
            .get(net_id)
            .map(|net| lock::read(&net.state).extractions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connections_at(&self, position: Position, substance: Substance) -> Option<DirectionSet> {
        let pipes = lock::read(&self.pipes);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position)?;
        let slot = lock::read(pipes[pipe_id].slot(substance));
        slot.present.then_some(slot.connections)
    }

    pub fn extractors_at(&self, position: Position, substance: Substance) -> Option<DirectionSet> {
        let pipes = lock::read(&self.pipes);
        let index = lock::read(&self.index);
        let &pipe_id = index.get(&position)?;
        let slot = lock::read(pipes[pipe_id].slot(substance));
        slot.present.then_some(slot.extractors)
    }

    /// Sprite-selection index for the rendering collaborator: the raw 4-bit
    /// connection mask of the given substance.
    pub fn march_index_at(&self, position: Position, substance: Substance) -> Option<u8> {
        self.connections_at(position, substance)
            .map(|mask| mask.march_index())
    }
}

// ---------------------------------------------------------------------------
// Graph helpers, shared with the loader
// ---------------------------------------------------------------------------

/// Collect the connected component containing `start`, following mutual
/// connection bits only. Dying pipes are invisible to the traversal.
pub(crate) fn component_from(
    pipes: &SlotMap<PipeId, Pipe>,
    index: &BTreeMap<Position, PipeId>,
    substance: Substance,
    start: PipeId,
) -> BTreeSet<PipeId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(pid) = queue.pop_front() {
        if seen.contains(&pid) {
            continue;
        }
        let Some(pipe) = pipes.get(pid) else { continue };
        if pipe.is_dying() {
            continue;
        }
        let slot = lock::read(pipe.slot(substance));
        if !slot.present {
            continue;
        }
        seen.insert(pid);
        for direction in slot.connections.active() {
            let Some(&nid) = index.get(&pipe.position().offset(direction)) else {
                continue;
            };
            if seen.contains(&nid) {
                continue;
            }
            let nslot = lock::read(pipes[nid].slot(substance));
            if nslot.present && nslot.connections.contains(direction.opposite()) {
                queue.push_back(nid);
            }
        }
    }
    seen
}

/// Re-parent every member of `source` to the target network, merge the point
/// sets and buffered policy state, and leave `source` empty. The caller
/// removes the drained network from the arena afterwards.
pub(crate) fn absorb_locked(
    pipes: &SlotMap<PipeId, Pipe>,
    networks: &SlotMap<NetworkId, PipeNetwork>,
    target_state: &mut NetState,
    target_id: NetworkId,
    source_id: NetworkId,
) {
    let source = &networks[source_id];
    assert_eq!(
        networks[target_id].substance(),
        source.substance(),
        "absorb requires same-substance networks"
    );
    let substance = source.substance();
    let mut source_state = lock::write(&source.state);
    for &pid in &source_state.members {
        lock::write(pipes[pid].slot(substance)).network = Some(target_id);
        target_state.members.insert(pid);
    }
    source_state.members.clear();
    target_state.insertions.append(&mut source_state.insertions);
    target_state.extractions.append(&mut source_state.extractions);
    target_state.policy.absorb(&mut source_state.policy);
}

/// Split the `moved` component off `from` into a fresh network, migrating
/// membership and every point whose owning pipe moved.
pub(crate) fn partition_locked(
    pipes: &SlotMap<PipeId, Pipe>,
    networks: &mut SlotMap<NetworkId, PipeNetwork>,
    substance: Substance,
    from: NetworkId,
    moved: &BTreeSet<PipeId>,
) -> NetworkId {
    let new_id = networks.insert_with_key(|id| PipeNetwork::new(id, substance));
    let from_net = &networks[from];
    let new_net = &networks[new_id];
    let mut from_state = lock::write(&from_net.state);
    let mut new_state = lock::write(&new_net.state);

    for &pid in moved {
        if from_state.members.remove(&pid) {
            new_state.members.insert(pid);
            lock::write(pipes[pid].slot(substance)).network = Some(new_id);
        }
    }

    // A point belongs with the network that contains its owning pipe.
    let moved_positions: BTreeSet<Position> =
        moved.iter().map(|&pid| pipes[pid].position()).collect();
    migrate_points(&moved_positions, &mut from_state.insertions, &mut new_state.insertions);
    migrate_points(&moved_positions, &mut from_state.extractions, &mut new_state.extractions);
    new_id
}

fn migrate_points(
    moved_positions: &BTreeSet<Position>,
    from: &mut BTreeSet<Point>,
    into: &mut BTreeSet<Point>,
) {
    let moving: Vec<Point> = from
        .iter()
        .filter(|point| moved_positions.contains(&point.pipe_position()))
        .copied()
        .collect();
    for point in moving {
        from.remove(&point);
        into.insert(point);
    }
}

/// Walk the four tiles around `position` and fix up each adjacent loaded
/// pipe's point registrations for the tile now at that position.
pub(crate) fn reconsider_points_locked(
    world: &dyn TileGrid,
    pipes: &SlotMap<PipeId, Pipe>,
    networks: &SlotMap<NetworkId, PipeNetwork>,
    index: &BTreeMap<Position, PipeId>,
    position: Position,
) {
    let tile = world.tile_at(position);
    for side in Direction::all() {
        let Some(&pid) = index.get(&position.offset(side)) else {
            continue;
        };
        let pipe = &pipes[pid];
        if pipe.is_dying() {
            continue;
        }
        let point = Point { position, side };
        let toward = side.opposite();
        for substance in Substance::all() {
            let (connected, extracting, net_id) = {
                let slot = lock::read(pipe.slot(substance));
                if !slot.present {
                    continue;
                }
                (
                    slot.connections.contains(toward),
                    slot.extractors.contains(toward),
                    slot.network,
                )
            };
            let Some(net_id) = net_id else { continue };
            let Some(net) = networks.get(net_id) else {
                continue;
            };
            let compatible =
                tile.is_some_and(|tile| policy::substance_compatible(substance, tile));
            let mut state = lock::write(&net.state);
            if connected && compatible {
                state.insertions.insert(point);
                if extracting {
                    state.extractions.insert(point);
                } else {
                    state.extractions.remove(&point);
                }
            } else {
                state.insertions.remove(&point);
                state.extractions.remove(&point);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
