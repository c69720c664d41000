//! Transition and reward model of the cave.
//!
//! Movement may slip sideways (stochastic mode), bridges and monsters are
//! gated by skill checks whose odds come from the config, and EXIT ends the
//! episode. Everything here is a pure function of the cave, the config and
//! the state.

use crate::{
    Action, Direction, Position,
    cave::Cave,
    config::{MovementModel, RewardTable, SolverConfig},
    skill::SkillOdds,
    state::{PositionSet, State},
};

const INTENDED_PROBABILITY: f64 = 0.8;
const DEVIATION_PROBABILITY: f64 = 0.2;

/// One possible result of taking an action in a state.
#[derive(Debug, Clone, PartialEq)]
pub struct Successor {
    pub state: State,
    pub probability: f64,
    pub reward: f64,
    /// EXIT leaves the cave; nothing follows a terminal successor.
    pub terminal: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionModel<'a> {
    cave: &'a Cave,
    movement: MovementModel,
    odds: SkillOdds,
    rewards: RewardTable,
}

impl<'a> TransitionModel<'a> {
    pub fn new(cave: &'a Cave, config: &SolverConfig) -> Self {
        TransitionModel {
            cave,
            movement: config.movement,
            odds: config.odds,
            rewards: config.rewards,
        }
    }

    pub fn cave(&self) -> &'a Cave {
        self.cave
    }

    /// Where a step in `direction` lands, before any bridge check.
    ///
    /// A blocked intended cell bounces the agent back in both modes. In
    /// stochastic mode the intended cell gets 0.8 and the other 0.2 is shared
    /// by the walkable perpendicular cells; blocked deviations hand their
    /// share to the other deviation, never to the intended cell.
    pub fn landing_distribution(&self, position: Position, direction: Direction) -> Vec<(Position, f64)> {
        let target = match self.walkable_neighbor(position, direction) {
            Some(target) => target,
            None => return vec![(position, 1.0)],
        };
        if self.movement == MovementModel::Deterministic {
            return vec![(target, 1.0)];
        }

        let deviations: Vec<Position> = [direction.left(), direction.right()]
            .into_iter()
            .filter_map(|side| self.walkable_neighbor(position, side))
            .collect();
        if deviations.is_empty() {
            return vec![(target, 1.0)];
        }
        let share = DEVIATION_PROBABILITY / deviations.len() as f64;
        std::iter::once((target, INTENDED_PROBABILITY))
            .chain(deviations.into_iter().map(|cell| (cell, share)))
            .collect()
    }

    fn walkable_neighbor(&self, position: Position, direction: Direction) -> Option<Position> {
        self.cave
            .grid()
            .neighbor(position, direction)
            .filter(|next| self.cave.is_walkable(*next))
    }

    /// Landing distribution with bridge checks applied: a failed crossing
    /// leaves the agent where it stood.
    fn movement_distribution(&self, position: Position, direction: Direction) -> Vec<(Position, f64)> {
        let mut outcomes: Vec<(Position, f64)> = Vec::with_capacity(4);
        for (cell, probability) in self.landing_distribution(position, direction) {
            if cell != position && self.cave.is_bridge(cell) {
                push_merged(&mut outcomes, cell, probability * self.odds.bridge);
                push_merged(&mut outcomes, position, probability * (1.0 - self.odds.bridge));
            } else {
                push_merged(&mut outcomes, cell, probability);
            }
        }
        outcomes
    }

    pub fn can_fight(&self, position: Position, resolved: &PositionSet) -> bool {
        self.cave.is_monster(position) && !resolved.contains(position)
    }

    /// Distribution over next positions. Empty when the action is inapplicable.
    pub fn position_distribution(
        &self,
        position: Position,
        action: Action,
        resolved: &PositionSet,
    ) -> Vec<(Position, f64)> {
        match action.direction() {
            Some(direction) => self.movement_distribution(position, direction),
            None => match action {
                Action::Exit if self.cave.is_exit(position) => vec![(position, 1.0)],
                Action::Fight if self.can_fight(position, resolved) => vec![(position, 1.0)],
                _ => Vec::new(),
            },
        }
    }

    pub fn possible_next_positions(
        &self,
        position: Position,
        action: Action,
        resolved: &PositionSet,
    ) -> Vec<Position> {
        self.position_distribution(position, action, resolved)
            .into_iter()
            .map(|(next, _)| next)
            .collect()
    }

    pub fn transition_probability(
        &self,
        position: Position,
        action: Action,
        next_position: Position,
        resolved: &PositionSet,
    ) -> f64 {
        self.position_distribution(position, action, resolved)
            .into_iter()
            .find(|(next, _)| *next == next_position)
            .map_or(0.0, |(_, probability)| probability)
    }

    pub fn is_applicable(&self, state: &State, action: Action) -> bool {
        match action {
            Action::Exit => self.cave.is_exit(state.position),
            Action::Fight => self.can_fight(state.position, &state.resolved),
            _ => true,
        }
    }

    /// Full successor states with their probabilities and rewards.
    pub fn successors(&self, state: &State, action: Action) -> Vec<Successor> {
        match action {
            Action::Exit => {
                if !self.is_applicable(state, action) {
                    return Vec::new();
                }
                vec![Successor {
                    state: state.clone(),
                    probability: 1.0,
                    reward: self.reward(state, action, state),
                    terminal: true,
                }]
            }
            Action::Fight => {
                if !self.is_applicable(state, action) {
                    return Vec::new();
                }
                let won = State {
                    resolved: state.resolved.with(state.position),
                    ..state.clone()
                };
                [(won, self.odds.combat), (state.clone(), 1.0 - self.odds.combat)]
                    .into_iter()
                    .filter(|(_, probability)| *probability > 0.0)
                    .map(|(next, probability)| Successor {
                        reward: self.reward(state, action, &next),
                        state: next,
                        probability,
                        terminal: false,
                    })
                    .collect()
            }
            _ => self
                .position_distribution(state.position, action, &state.resolved)
                .into_iter()
                .map(|(next_position, probability)| {
                    let next = self.arrive(state, next_position);
                    Successor {
                        reward: self.reward(state, action, &next),
                        state: next,
                        probability,
                        terminal: false,
                    }
                })
                .collect(),
        }
    }

    /// The state after standing on `position`, picking up any gold there.
    fn arrive(&self, state: &State, position: Position) -> State {
        let mut next = state.moved_to(position);
        if self.cave.has_gold(position) {
            next.collected.insert(position);
        }
        next
    }

    /// Sum of the independent reward terms of `from --action--> to`.
    pub fn reward(&self, from: &State, action: Action, to: &State) -> f64 {
        let r = &self.rewards;
        let mut reward = r.step;

        let moved = to.position != from.position;
        if action.is_movement() && !moved {
            reward += r.bump;
        }
        if self.cave.has_gold(to.position) && !from.collected.contains(to.position) {
            reward += r.gold;
        }
        if action == Action::Fight && !from.resolved.contains(from.position) && to.resolved.contains(from.position) {
            reward += r.combat;
        }
        if action.is_movement()
            && moved
            && self.cave.is_monster(to.position)
            && !from.resolved.contains(to.position)
        {
            reward += r.monster;
        }
        if self.cave.is_pit(to.position) {
            reward += r.pit;
        }
        if action == Action::Exit && self.cave.is_exit(to.position) {
            let carried = from.collected.len();
            reward += r.exit_per_gold * carried as f64;
            let total = self.cave.gold_positions().len();
            if total > 0 && carried == total {
                reward += r.full_clear;
            }
        }
        reward
    }
}

fn push_merged(outcomes: &mut Vec<(Position, f64)>, position: Position, probability: f64) {
    if probability <= 0.0 {
        return;
    }
    match outcomes.iter_mut().find(|(cell, _)| *cell == position) {
        Some((_, mass)) => *mass += probability,
        None => outcomes.push((position, probability)),
    }
}
