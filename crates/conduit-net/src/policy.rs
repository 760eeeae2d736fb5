//! Per-substance distribution policies.
//!
//! Each network tick runs under the network's state write lock:
//!
//! 1. purge stale points (machine gone or no longer substance-compatible);
//! 2. drain buffered resource toward insertion points;
//! 3. pull fresh supply from extraction points.
//!
//! Items pull and deliver in the same tick (one stack, one round-robin
//! target). Fluid pulls one transfer quantum into the overflow buffer only
//! once the buffer has fully drained. Energy keeps a network-wide buffer and
//! refuses extraction once it is at capacity. A rejected delivery is never an
//! error: the remainder stays buffered and is retried next tick.

use conduit_grid::{Fixed64, FluidTypeId, ItemStack, Substance, TileEntity, TileGrid};

use crate::network::{NetState, Point, Policy};

/// Most items one extraction pull may take per tick.
pub const ITEM_PULL_MAX: u32 = 16;

/// Fluid moved from extraction points into the network per tick. Q32.32 bits:
/// 50.0.
pub const FLUID_TRANSFER_PER_TICK: Fixed64 = Fixed64::from_bits(50 << 32);

/// Energy moved from extraction points into the network per tick. Q32.32
/// bits: 100.0.
pub const ENERGY_TRANSFER_PER_TICK: Fixed64 = Fixed64::from_bits(100 << 32);

/// Network-wide energy buffer capacity, distinct from any machine's own
/// capacity. Q32.32 bits: 500.0.
pub const ENERGY_NETWORK_CAPACITY: Fixed64 = Fixed64::from_bits(500 << 32);

/// Whether a tile can participate in a network of the given substance:
/// insertion and extraction points must expose the matching container.
pub(crate) fn substance_compatible(substance: Substance, tile: &dyn TileEntity) -> bool {
    match substance {
        Substance::Item => tile.item_container().is_some(),
        Substance::Fluid => tile.fluid_container().is_some(),
        Substance::Energy => tile.energy_container().is_some(),
        Substance::Data => tile.data_receiver().is_some(),
    }
}

/// Lazy purge: drop points whose tile is gone or no longer compatible.
fn purge_stale(world: &dyn TileGrid, substance: Substance, state: &mut NetState) {
    let valid = |point: &Point| {
        world
            .tile_at(point.position)
            .is_some_and(|tile| substance_compatible(substance, tile))
    };
    state.insertions.retain(valid);
    state.extractions.retain(valid);
}

// ---------------------------------------------------------------------------
// Item distribution
// ---------------------------------------------------------------------------

pub(crate) fn tick_item(world: &dyn TileGrid, state: &mut NetState) {
    purge_stale(world, Substance::Item, state);
    let NetState {
        insertions,
        extractions,
        policy,
        ..
    } = state;
    let Policy::Item { cursor, overflow } = policy else {
        unreachable!("item network carries an item policy");
    };

    if insertions.is_empty() {
        // Nowhere to deliver: never pull, keep any overflow for later.
        return;
    }

    let Some(target) = insertions.iter().nth(*cursor % insertions.len()).copied() else {
        return;
    };
    // The cursor advances exactly once per tick, success or not; rotation is
    // what guarantees no insertion point starves under sustained supply.
    *cursor = cursor.wrapping_add(1);

    let stack = if overflow.is_empty() {
        pull_item(world, extractions)
    } else {
        Some(overflow.remove(0))
    };
    let Some(stack) = stack else {
        return;
    };

    let rejected = offer_item(world, target, stack);
    if let Some(rest) = rejected {
        // Retried before any new extraction next tick.
        overflow.insert(0, rest);
    }
}

fn pull_item(world: &dyn TileGrid, extractions: &std::collections::BTreeSet<Point>) -> Option<ItemStack> {
    for point in extractions {
        if let Some(container) = world.tile_at(point.position).and_then(|t| t.item_container())
            && let Some(stack) = container.extract(point.side, ITEM_PULL_MAX, true)
            && stack.quantity > 0
        {
            return Some(stack);
        }
    }
    None
}

fn offer_item(world: &dyn TileGrid, target: Point, stack: ItemStack) -> Option<ItemStack> {
    match world.tile_at(target.position).and_then(|t| t.item_container()) {
        Some(container) if container.can_insert(&stack) => container.insert(stack),
        // Rejected outright (filter, full, or tile vanished mid-tick).
        _ => Some(stack),
    }
}

// ---------------------------------------------------------------------------
// Fluid distribution
// ---------------------------------------------------------------------------

pub(crate) fn tick_fluid(world: &dyn TileGrid, state: &mut NetState) {
    purge_stale(world, Substance::Fluid, state);
    let NetState {
        insertions,
        extractions,
        policy,
        ..
    } = state;
    let Policy::Fluid { overflow } = policy else {
        unreachable!("fluid network carries a fluid policy");
    };

    // Phase 1: drain the buffer toward insertion points.
    if !overflow.is_empty() {
        let buffered: Vec<(FluidTypeId, Fixed64)> =
            overflow.iter().map(|(fluid, amount)| (*fluid, *amount)).collect();
        overflow.clear();
        for (fluid, amount) in buffered {
            let leftover = distribute_fluid(world, insertions, fluid, amount);
            if leftover > Fixed64::ZERO {
                *overflow.entry(fluid).or_insert(Fixed64::ZERO) += leftover;
            }
        }
    }

    // Phase 2: only a fully drained buffer pulls fresh supply, one quantum.
    if overflow.is_empty() {
        for point in extractions.iter() {
            if let Some(container) = world.tile_at(point.position).and_then(|t| t.fluid_container())
                && let Some(pulled) =
                    container.extract(point.side, FLUID_TRANSFER_PER_TICK, true)
                && pulled.amount > Fixed64::ZERO
            {
                *overflow.entry(pulled.fluid_type).or_insert(Fixed64::ZERO) += pulled.amount;
                break;
            }
        }
    }
}

/// Split `amount` evenly across all currently-accepting insertion points,
/// remainder to the last recipient so no fractional loss occurs. Returns the
/// undelivered leftover; `amount == delivered + leftover` always holds.
pub(crate) fn distribute_fluid(
    world: &dyn TileGrid,
    insertions: &std::collections::BTreeSet<Point>,
    fluid: FluidTypeId,
    amount: Fixed64,
) -> Fixed64 {
    let accepting: Vec<_> = insertions
        .iter()
        .filter_map(|point| {
            world
                .tile_at(point.position)
                .and_then(|t| t.fluid_container())
                .filter(|c| c.can_insert(fluid))
        })
        .collect();
    if accepting.is_empty() {
        return amount;
    }

    let n = accepting.len();
    let share = amount / Fixed64::from_num(n as u32);
    let mut leftover = Fixed64::ZERO;
    for (i, container) in accepting.iter().enumerate() {
        let give = if i + 1 == n {
            amount - share * Fixed64::from_num((n - 1) as u32)
        } else {
            share
        };
        leftover += container.insert(fluid, give);
    }
    leftover
}

// ---------------------------------------------------------------------------
// Energy distribution
// ---------------------------------------------------------------------------

pub(crate) fn tick_energy(world: &dyn TileGrid, state: &mut NetState) {
    purge_stale(world, Substance::Energy, state);
    let NetState {
        insertions,
        extractions,
        policy,
        ..
    } = state;
    let Policy::Energy { buffer, capacity } = policy else {
        unreachable!("energy network carries an energy policy");
    };

    // Phase 1: drain the buffer toward insertion points.
    if *buffer > Fixed64::ZERO {
        *buffer = distribute_energy(world, insertions, *buffer);
    }

    // Phase 2: pull while below network capacity; a full buffer refuses
    // extraction entirely.
    let headroom = *capacity - *buffer;
    if headroom > Fixed64::ZERO {
        let mut want = ENERGY_TRANSFER_PER_TICK.min(headroom);
        for point in extractions.iter() {
            if want <= Fixed64::ZERO {
                break;
            }
            if let Some(container) = world.tile_at(point.position).and_then(|t| t.energy_container())
            {
                let got = container.extract(point.side, want, true);
                *buffer += got;
                want -= got;
            }
        }
    }
}

/// Even split with remainder-to-last, like [`distribute_fluid`]. Returns the
/// undelivered leftover.
pub(crate) fn distribute_energy(
    world: &dyn TileGrid,
    insertions: &std::collections::BTreeSet<Point>,
    amount: Fixed64,
) -> Fixed64 {
    let accepting: Vec<_> = insertions
        .iter()
        .filter_map(|point| {
            world
                .tile_at(point.position)
                .and_then(|t| t.energy_container())
                .filter(|c| c.can_insert())
        })
        .collect();
    if accepting.is_empty() {
        return amount;
    }

    let n = accepting.len();
    let share = amount / Fixed64::from_num(n as u32);
    let mut leftover = Fixed64::ZERO;
    for (i, container) in accepting.iter().enumerate() {
        let give = if i + 1 == n {
            amount - share * Fixed64::from_num((n - 1) as u32)
        } else {
            share
        };
        leftover += container.insert(give);
    }
    leftover
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_grid::test_utils::{Machine, TestGrid, fixed};
    use conduit_grid::{Direction, ItemTypeId, Position};

    fn point(x: i32, y: i32, side: Direction) -> Point {
        Point {
            position: Position::new(x, y),
            side,
        }
    }

    fn item_state(insertions: &[Point], extractions: &[Point]) -> NetState {
        let mut state = NetState::new(Substance::Item);
        state.insertions.extend(insertions.iter().copied());
        state.extractions.extend(extractions.iter().copied());
        state
    }

    // -----------------------------------------------------------------------
    // Item policy
    // -----------------------------------------------------------------------

    #[test]
    fn item_round_robin_visits_each_insertion_once() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let sinks = [
            point(2, 0, Direction::West),
            point(2, 1, Direction::West),
            point(2, 2, Direction::West),
        ];
        let supplier = Machine::new(1).with_inventory(100);
        supplier.stock_items(ItemTypeId(0), 100);
        grid.place(source.position, supplier);
        for (i, sink) in sinks.iter().enumerate() {
            grid.place(sink.position, Machine::new(10 + i as u64).with_inventory(100));
        }

        let mut state = item_state(&sinks, &[source]);
        for _ in 0..3 {
            tick_item(&grid, &mut state);
        }

        for sink in &sinks {
            assert_eq!(
                grid.machine(sink.position).item_total(),
                ITEM_PULL_MAX,
                "each insertion point receives exactly one delivery per rotation"
            );
        }
        assert_eq!(grid.machine(source.position).item_total(), 100 - 3 * ITEM_PULL_MAX);
    }

    #[test]
    fn item_rejection_is_buffered_and_retried() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let sink = point(2, 0, Direction::West);
        let supplier = Machine::new(1).with_inventory(100);
        supplier.stock_items(ItemTypeId(0), 20);
        grid.place(source.position, supplier);
        // Sink only takes items of type 1: the pulled stack is rejected whole.
        grid.place(
            sink.position,
            Machine::new(2).with_inventory(100).with_item_filter([ItemTypeId(1)]),
        );

        let mut state = item_state(&[sink], &[source]);
        tick_item(&grid, &mut state);

        let Policy::Item { overflow, .. } = &state.policy else {
            panic!("wrong policy");
        };
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow[0].quantity, ITEM_PULL_MAX);
        // Nothing dropped: source lost exactly what the network now buffers.
        assert_eq!(grid.machine(source.position).item_total(), 20 - ITEM_PULL_MAX);

        // Remove the filter obstacle by swapping the sink machine.
        grid.remove(sink.position);
        grid.place(sink.position, Machine::new(3).with_inventory(100));
        tick_item(&grid, &mut state);

        let Policy::Item { overflow, .. } = &state.policy else {
            panic!("wrong policy");
        };
        assert!(overflow.is_empty(), "overflow delivered before new extraction");
        assert_eq!(grid.machine(sink.position).item_total(), ITEM_PULL_MAX);
    }

    #[test]
    fn item_network_with_no_insertions_never_pulls() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let supplier = Machine::new(1).with_inventory(100);
        supplier.stock_items(ItemTypeId(0), 50);
        grid.place(source.position, supplier);

        let mut state = item_state(&[], &[source]);
        tick_item(&grid, &mut state);

        assert_eq!(grid.machine(source.position).item_total(), 50);
    }

    #[test]
    fn item_stale_insertion_point_is_purged() {
        let grid = TestGrid::new(); // no machines at all
        let mut state = item_state(&[point(2, 0, Direction::West)], &[]);
        tick_item(&grid, &mut state);
        assert!(state.insertions.is_empty());
    }

    // -----------------------------------------------------------------------
    // Fluid policy
    // -----------------------------------------------------------------------

    #[test]
    fn fluid_distribute_conserves_amount() {
        let mut grid = TestGrid::new();
        let sinks = [
            point(1, 0, Direction::West),
            point(1, 1, Direction::West),
            point(1, 2, Direction::West),
        ];
        // Second tank is nearly full: it rejects most of its share.
        grid.place(sinks[0].position, Machine::new(1).with_tank(fixed(100.0)));
        let tight = Machine::new(2).with_tank(fixed(100.0));
        tight.fill_fluid(FluidTypeId(0), fixed(99.0));
        grid.place(sinks[1].position, tight);
        grid.place(sinks[2].position, Machine::new(3).with_tank(fixed(100.0)));

        let insertions: std::collections::BTreeSet<Point> = sinks.iter().copied().collect();
        let amount = fixed(30.0);
        let leftover = distribute_fluid(&grid, &insertions, FluidTypeId(0), amount);

        let delivered = grid.machine(sinks[0].position).fluid_total()
            + (grid.machine(sinks[1].position).fluid_total() - fixed(99.0))
            + grid.machine(sinks[2].position).fluid_total();
        assert_eq!(amount, delivered + leftover);
        assert_eq!(leftover, fixed(9.0), "10 - 1 headroom rejected by the tight tank");
    }

    #[test]
    fn fluid_split_gives_remainder_to_last() {
        let mut grid = TestGrid::new();
        let sinks = [point(1, 0, Direction::West), point(1, 1, Direction::West)];
        grid.place(sinks[0].position, Machine::new(1).with_tank(fixed(100.0)));
        grid.place(sinks[1].position, Machine::new(2).with_tank(fixed(100.0)));

        let insertions: std::collections::BTreeSet<Point> = sinks.iter().copied().collect();
        let leftover = distribute_fluid(&grid, &insertions, FluidTypeId(0), fixed(7.0));

        assert_eq!(leftover, Fixed64::ZERO);
        assert_eq!(grid.machine(sinks[0].position).fluid_total(), fixed(3.5));
        assert_eq!(grid.machine(sinks[1].position).fluid_total(), fixed(3.5));
    }

    #[test]
    fn fluid_pulls_only_when_buffer_empty() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let tank = Machine::new(1).with_tank(fixed(1000.0));
        tank.fill_fluid(FluidTypeId(0), fixed(500.0));
        grid.place(source.position, tank);
        // No insertion points: the first pull parks a quantum in the buffer
        // and later ticks must not accumulate more.
        let mut state = NetState::new(Substance::Fluid);
        state.extractions.insert(source);

        tick_fluid(&grid, &mut state);
        tick_fluid(&grid, &mut state);
        tick_fluid(&grid, &mut state);

        let Policy::Fluid { overflow } = &state.policy else {
            panic!("wrong policy");
        };
        assert_eq!(overflow[&FluidTypeId(0)], FLUID_TRANSFER_PER_TICK);
        assert_eq!(
            grid.machine(source.position).fluid_total(),
            fixed(500.0) - FLUID_TRANSFER_PER_TICK
        );
    }

    #[test]
    fn fluid_buffer_drains_then_refills() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let sink = point(2, 0, Direction::West);
        let tank = Machine::new(1).with_tank(fixed(1000.0));
        tank.fill_fluid(FluidTypeId(0), fixed(500.0));
        grid.place(source.position, tank);
        grid.place(sink.position, Machine::new(2).with_tank(fixed(1000.0)));

        let mut state = NetState::new(Substance::Fluid);
        state.extractions.insert(source);
        state.insertions.insert(sink);

        // Tick 1: buffer empty, pull a quantum.
        tick_fluid(&grid, &mut state);
        // Tick 2: deliver it, then pull the next.
        tick_fluid(&grid, &mut state);

        assert_eq!(grid.machine(sink.position).fluid_total(), FLUID_TRANSFER_PER_TICK);
        let Policy::Fluid { overflow } = &state.policy else {
            panic!("wrong policy");
        };
        assert_eq!(overflow[&FluidTypeId(0)], FLUID_TRANSFER_PER_TICK);
    }

    // -----------------------------------------------------------------------
    // Energy policy
    // -----------------------------------------------------------------------

    #[test]
    fn energy_distribute_conserves_amount() {
        let mut grid = TestGrid::new();
        let sinks = [point(1, 0, Direction::West), point(1, 1, Direction::West)];
        grid.place(sinks[0].position, Machine::new(1).with_battery(fixed(4.0)));
        grid.place(sinks[1].position, Machine::new(2).with_battery(fixed(100.0)));

        let insertions: std::collections::BTreeSet<Point> = sinks.iter().copied().collect();
        let amount = fixed(20.0);
        let leftover = distribute_energy(&grid, &insertions, amount);

        let delivered =
            grid.machine(sinks[0].position).charge() + grid.machine(sinks[1].position).charge();
        assert_eq!(amount, delivered + leftover);
        assert_eq!(leftover, fixed(6.0), "small battery rejects 10 - 4");
    }

    #[test]
    fn energy_refuses_extraction_once_full() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let generator = Machine::new(1).with_battery(fixed(10000.0));
        generator.charge_battery(fixed(10000.0));
        grid.place(source.position, generator);

        let mut state = NetState::new(Substance::Energy);
        state.extractions.insert(source);

        // No insertions: the buffer climbs by one quantum per tick until it
        // hits network capacity, then extraction stops.
        let ticks_to_fill = 10;
        for _ in 0..ticks_to_fill {
            tick_energy(&grid, &mut state);
        }

        let Policy::Energy { buffer, capacity } = &state.policy else {
            panic!("wrong policy");
        };
        assert_eq!(*buffer, *capacity);
        assert_eq!(
            grid.machine(source.position).charge(),
            fixed(10000.0) - *capacity,
            "extraction stopped exactly at network capacity"
        );
    }

    #[test]
    fn energy_buffer_drains_before_pulling() {
        let mut grid = TestGrid::new();
        let source = point(0, 0, Direction::East);
        let sink = point(2, 0, Direction::West);
        let generator = Machine::new(1).with_battery(fixed(10000.0));
        generator.charge_battery(fixed(10000.0));
        grid.place(source.position, generator);
        grid.place(sink.position, Machine::new(2).with_battery(fixed(10000.0)));

        let mut state = NetState::new(Substance::Energy);
        state.extractions.insert(source);
        state.insertions.insert(sink);

        tick_energy(&grid, &mut state); // pull only (buffer was empty)
        tick_energy(&grid, &mut state); // drain, then pull again

        assert_eq!(grid.machine(sink.position).charge(), ENERGY_TRANSFER_PER_TICK);
        let Policy::Energy { buffer, .. } = &state.policy else {
            panic!("wrong policy");
        };
        assert_eq!(*buffer, ENERGY_TRANSFER_PER_TICK);
    }
}
