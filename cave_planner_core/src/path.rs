//! A* path finding over the cave's walkable cells.
//!
//! The planner only uses it to redirect a premature EXIT towards gold the
//! policy would otherwise leave behind.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use crate::{Direction, Position, cave::Cave};

#[derive(Clone, Eq, PartialEq)]
struct PrioritizedItem {
    priority: usize,
    position: Position,
}

impl Ord for PrioritizedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for PrioritizedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Walkable neighbours of `position` that `can_enter` admits, in
/// vocabulary order.
fn valid_neighbors<F>(cave: &Cave, position: Position, can_enter: &F) -> Vec<Position>
where
    F: Fn(Position) -> bool,
{
    Direction::ALL
        .into_iter()
        .filter_map(|direction| cave.grid().neighbor(position, direction))
        .filter(|next| cave.is_walkable(*next) && can_enter(*next))
        .collect()
}

/// Shortest path from `start` to `goal`, both ends included.
///
/// Returns `None` when `goal` cannot be reached through cells admitted by
/// `can_enter`. The start cell itself is never checked.
pub fn shortest_path<F>(cave: &Cave, start: Position, goal: Position, can_enter: F) -> Option<Vec<Position>>
where
    F: Fn(Position) -> bool,
{
    if !cave.is_walkable(goal) {
        return None;
    }

    let mut frontier = BinaryHeap::new();
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut cost_so_far: HashMap<Position, usize> = HashMap::new();

    frontier.push(PrioritizedItem {
        priority: 0,
        position: start,
    });
    cost_so_far.insert(start, 0);

    let mut goal_reached = false;
    while let Some(PrioritizedItem {
        position: current, ..
    }) = frontier.pop()
    {
        if current == goal {
            goal_reached = true;
            break;
        }

        let current_cost = cost_so_far.get(&current).copied().unwrap_or(usize::MAX);
        for neighbor in valid_neighbors(cave, current, &can_enter) {
            let new_cost = current_cost.saturating_add(1);
            if cost_so_far.get(&neighbor).is_none_or(|known| new_cost < *known) {
                cost_so_far.insert(neighbor, new_cost);
                frontier.push(PrioritizedItem {
                    priority: new_cost + neighbor.manhattan_distance(goal),
                    position: neighbor,
                });
                came_from.insert(neighbor, current);
            }
        }
    }

    if !goal_reached {
        return None;
    }

    let mut path = vec![goal];
    let mut current = goal;
    while current != start {
        current = *came_from.get(&current)?;
        path.push(current);
    }
    path.reverse();
    Some(path)
}

/// The reachable target with the shortest path, and that path.
///
/// Ties go to the target listed first.
pub fn nearest_reachable<F>(
    cave: &Cave,
    start: Position,
    targets: &[Position],
    can_enter: F,
) -> Option<(Position, Vec<Position>)>
where
    F: Fn(Position) -> bool,
{
    let mut best: Option<(Position, Vec<Position>)> = None;
    for &target in targets {
        let Some(path) = shortest_path(cave, start, target, &can_enter) else {
            continue;
        };
        if best.as_ref().is_none_or(|(_, known)| path.len() < known.len()) {
            best = Some((target, path));
        }
    }
    best
}

/// Heading of a single step between adjacent cells.
pub fn direction_between(from: Position, to: Position) -> Option<Direction> {
    Direction::ALL
        .into_iter()
        .find(|direction| from.step(*direction) == Some(to))
}
