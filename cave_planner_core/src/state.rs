//! Planning states and their enumeration.
//!
//! A state is `(position, collected gold, resolved hazards)`. The enumerated
//! space is every walkable position crossed with every subset of the gold
//! and every subset of the hazards still open, so it holds
//! `walkable * 2^gold * 2^open_hazards` states. That exponential factor is
//! what bounds practical map sizes, and why `SolverConfig::max_items` caps
//! the number of subset items.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{Position, cave::Cave};

/// An unordered set of positions with structural equality and hashing.
///
/// Two sets are equal when they hold the same positions, regardless of
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionSet(BTreeSet<Position>);

impl PositionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, position: Position) -> bool {
        self.0.contains(&position)
    }

    /// Adds `position`, returning `true` if it was not present.
    pub fn insert(&mut self, position: Position) -> bool {
        self.0.insert(position)
    }

    /// A copy of this set with `position` added.
    pub fn with(&self, position: Position) -> Self {
        let mut next = self.clone();
        next.insert(position);
        next
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &PositionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Position> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Position> for PositionSet {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        PositionSet(iter.into_iter().collect())
    }
}

/// The unit of planning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub position: Position,
    pub collected: PositionSet,
    pub resolved: PositionSet,
}

impl State {
    pub fn new(position: Position, collected: PositionSet, resolved: PositionSet) -> Self {
        State {
            position,
            collected,
            resolved,
        }
    }

    /// Same item sets, different position.
    pub fn moved_to(&self, position: Position) -> Self {
        State {
            position,
            ..self.clone()
        }
    }
}

/// Every subset of `items`, in bitmask order (empty set first).
pub fn subsets(items: &[Position]) -> impl Iterator<Item = PositionSet> + '_ {
    (0..1u64 << items.len()).map(move |mask| {
        items
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, position)| *position)
            .collect()
    })
}

/// The state space would need more than `limit` subset items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{items} gold and hazard items exceed the limit of {limit}")]
pub struct TooManyItems {
    pub items: usize,
    pub limit: usize,
}

/// The enumerated states of one (cave, baseline resolved set) pair.
#[derive(Debug, Clone)]
pub struct StateSpace {
    states: Vec<State>,
    index: HashMap<State, usize>,
    baseline: PositionSet,
}

impl StateSpace {
    /// Enumerates walkable positions × gold subsets × supersets of `baseline`
    /// drawn from `hazards`.
    ///
    /// Hazards already in `baseline` stay resolved in every state; only the
    /// remaining ones are enumerated. Fails when the number of subset items
    /// exceeds `max_items`.
    pub fn enumerate(
        cave: &Cave,
        hazards: &[Position],
        baseline: &PositionSet,
        max_items: usize,
    ) -> Result<Self, TooManyItems> {
        let open_hazards: Vec<Position> = hazards
            .iter()
            .copied()
            .filter(|h| !baseline.contains(*h))
            .collect();
        let items = cave.gold_positions().len() + open_hazards.len();
        if items > max_items || items >= 64 {
            return Err(TooManyItems {
                items,
                limit: max_items,
            });
        }

        let walkable = cave.walkable_positions();
        let gold_subsets: Vec<PositionSet> = subsets(cave.gold_positions()).collect();
        let hazard_subsets: Vec<PositionSet> = subsets(&open_hazards)
            .map(|extra| baseline.iter().chain(extra.iter()).collect())
            .collect();

        let mut states = Vec::with_capacity(walkable.len() * gold_subsets.len() * hazard_subsets.len());
        for position in &walkable {
            for collected in &gold_subsets {
                for resolved in &hazard_subsets {
                    states.push(State::new(*position, collected.clone(), resolved.clone()));
                }
            }
        }
        let index = states
            .iter()
            .enumerate()
            .map(|(i, state)| (state.clone(), i))
            .collect();

        tracing::debug!(
            states = states.len(),
            walkable = walkable.len(),
            gold = gold_subsets.len(),
            hazard_configurations = hazard_subsets.len(),
            "Enumerated state space"
        );

        Ok(StateSpace {
            states,
            index,
            baseline: baseline.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn index_of(&self, state: &State) -> Option<usize> {
        self.index.get(state).copied()
    }

    /// Resolved hazards every state in this space starts from.
    pub fn baseline(&self) -> &PositionSet {
        &self.baseline
    }
}
