//! Dynamic-programming solvers over an enumerated cave state space.
//!
//! [`CaveMdp`] compiles the transition model into per-state tables once, so
//! each sweep is a plain scan over indices. Sweeps update values in place
//! (Gauss-Seidel): later states in a sweep already see the new values of
//! earlier ones.

mod policy_iteration;
mod value_iteration;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use policy_iteration::PolicyIteration;
pub use value_iteration::ValueIteration;

use crate::{
    Action,
    cave::Cave,
    config::{Algorithm, SolverConfig},
    model::TransitionModel,
    state::{PositionSet, State, StateSpace, TooManyItems},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MdpError {
    #[error(transparent)]
    TooManyItems(#[from] TooManyItems),
    #[error("Action {action} from {state:?} leads outside the enumerated state space")]
    MissingSuccessor { state: State, action: Action },
}

/// One weighted outcome in the compiled tables.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    /// `None` for a terminal outcome.
    next: Option<usize>,
    probability: f64,
    reward: f64,
}

/// The MDP of one cave at one baseline hazard configuration.
#[derive(Debug, Clone)]
pub struct CaveMdp {
    space: Arc<StateSpace>,
    actions: &'static [Action],
    gamma: f64,
    /// `edges[state][action]`, `None` when the action is inapplicable.
    edges: Vec<Vec<Option<Vec<Edge>>>>,
}

impl CaveMdp {
    pub fn build(cave: &Cave, config: &SolverConfig, baseline: &PositionSet) -> Result<Self, MdpError> {
        let hazards = if config.hazard_aware {
            cave.monster_positions()
        } else {
            &[]
        };
        let space = StateSpace::enumerate(cave, hazards, baseline, config.max_items)?;
        let model = TransitionModel::new(cave, config);
        let actions = config.vocabulary();

        let mut edges = Vec::with_capacity(space.len());
        for state in space.states() {
            let mut row = Vec::with_capacity(actions.len());
            for &action in actions {
                let successors = model.successors(state, action);
                if successors.is_empty() {
                    row.push(None);
                    continue;
                }
                let compiled = successors
                    .into_iter()
                    .map(|successor| {
                        let next = if successor.terminal {
                            None
                        } else {
                            Some(space.index_of(&successor.state).ok_or_else(|| {
                                MdpError::MissingSuccessor {
                                    state: state.clone(),
                                    action,
                                }
                            })?)
                        };
                        Ok(Edge {
                            next,
                            probability: successor.probability,
                            reward: successor.reward,
                        })
                    })
                    .collect::<Result<Vec<_>, MdpError>>()?;
                row.push(Some(compiled));
            }
            edges.push(row);
        }

        Ok(CaveMdp {
            space: Arc::new(space),
            actions,
            gamma: config.gamma,
            edges,
        })
    }

    pub fn space(&self) -> &Arc<StateSpace> {
        &self.space
    }

    pub fn actions(&self) -> &'static [Action] {
        self.actions
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn len(&self) -> usize {
        self.space.len()
    }

    pub fn is_empty(&self) -> bool {
        self.space.is_empty()
    }

    fn action_slot(&self, action: Action) -> Option<usize> {
        self.actions.iter().position(|a| *a == action)
    }

    pub fn is_applicable(&self, state: usize, action: Action) -> bool {
        self.action_slot(action)
            .and_then(|slot| self.edges[state][slot].as_ref())
            .is_some()
    }

    /// `Σ P(s,a,s') · (R(s,a,s') + γ·V(s'))`, or `None` if `action` cannot be
    /// taken in `state`.
    pub fn lookahead(&self, state: usize, action: Action, values: &[f64]) -> Option<f64> {
        let edges = self.edges[state][self.action_slot(action)?].as_ref()?;
        Some(
            edges
                .iter()
                .map(|edge| {
                    let future = edge.next.map_or(0.0, |next| values[next]);
                    edge.probability * (edge.reward + self.gamma * future)
                })
                .sum(),
        )
    }

    /// Lookahead by state value; inapplicable actions carry zero probability
    /// mass and so are worth 0.0.
    pub fn q_value(&self, state: &State, action: Action, values: &ValueTable) -> Option<f64> {
        let index = self.space.index_of(state)?;
        Some(self.lookahead(index, action, values.as_slice()).unwrap_or(0.0))
    }

    /// The first applicable action, in vocabulary order, whose lookahead is
    /// within `tie_tolerance` of the best one.
    pub fn greedy(&self, state: usize, values: &[f64], tie_tolerance: f64) -> Option<(Action, f64)> {
        let candidates: Vec<(Action, f64)> = self
            .actions
            .iter()
            .filter_map(|&action| Some((action, self.lookahead(state, action, values)?)))
            .collect();
        let best = candidates
            .iter()
            .map(|(_, value)| *value)
            .fold(f64::NEG_INFINITY, f64::max);
        candidates
            .into_iter()
            .find(|(_, value)| *value >= best - tie_tolerance)
    }

    /// The most probable outcome of `action` in `state`: `Some(None)` when it
    /// ends the episode, `None` when the action cannot be taken.
    pub fn likely_successor(&self, state: usize, action: Action) -> Option<Option<usize>> {
        let edges = self.edges[state][self.action_slot(action)?].as_ref()?;
        edges
            .iter()
            .fold(None, |best: Option<&Edge>, edge| match best {
                Some(current) if current.probability >= edge.probability => Some(current),
                _ => Some(edge),
            })
            .map(|edge| edge.next)
    }

    /// Like [`greedy`](Self::greedy) but skipping `excluded`.
    pub fn best_excluding(
        &self,
        state: usize,
        values: &[f64],
        excluded: Action,
    ) -> Option<(Action, f64)> {
        self.actions
            .iter()
            .filter(|action| **action != excluded)
            .filter_map(|&action| Some((action, self.lookahead(state, action, values)?)))
            .fold(None, |best: Option<(Action, f64)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }
}

/// A total mapping from the states of one space to actions.
#[derive(Debug, Clone)]
pub struct Policy {
    space: Arc<StateSpace>,
    actions: Vec<Action>,
}

impl Policy {
    pub fn new(space: Arc<StateSpace>, actions: Vec<Action>) -> Self {
        assert_eq!(space.len(), actions.len(), "Policy must cover every state");
        Policy { space, actions }
    }

    /// The chosen action, or `None` for a state outside the space.
    pub fn action(&self, state: &State) -> Option<Action> {
        self.space.index_of(state).map(|index| self.actions[index])
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&State, Action)> {
        self.space.states().iter().zip(self.actions.iter().copied())
    }

    /// Number of states whose action differs from `other`.
    pub fn differences(&self, other: &Policy) -> usize {
        self.actions
            .iter()
            .zip(&other.actions)
            .filter(|(a, b)| a != b)
            .count()
    }
}

/// State values of one space.
#[derive(Debug, Clone)]
pub struct ValueTable {
    space: Arc<StateSpace>,
    values: Vec<f64>,
}

impl ValueTable {
    pub fn zeros(space: Arc<StateSpace>) -> Self {
        let values = vec![0.0; space.len()];
        ValueTable { space, values }
    }

    pub fn value(&self, state: &State) -> Option<f64> {
        self.space.index_of(state).map(|index| self.values[index])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Largest absolute difference against another table of the same space.
    pub fn max_difference(&self, other: &ValueTable) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub algorithm: Algorithm,
    /// False when a cap was hit first; the policy is still usable.
    pub converged: bool,
    /// Policy-improvement rounds (always 1 for value iteration).
    pub iterations: usize,
    /// Value sweeps over the whole space, summed over all rounds.
    pub sweeps: usize,
    /// Largest value change in the last sweep.
    pub final_delta: f64,
    /// Actions changed by the last improvement round.
    pub last_changes: usize,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub policy: Policy,
    pub values: ValueTable,
    pub report: SolveReport,
}

/// A dynamic-programming algorithm producing an optimal policy.
pub trait Solver {
    fn solve(&self, mdp: &CaveMdp) -> Solution;
}

/// Builds the solver selected by `config.algorithm`.
pub fn solver_for(config: &SolverConfig) -> Box<dyn Solver> {
    match config.algorithm {
        Algorithm::PolicyIteration => Box::new(PolicyIteration::new(config)),
        Algorithm::ValueIteration => Box::new(ValueIteration::new(config)),
    }
}

/// Greedy policy with respect to `values`.
fn greedy_policy(mdp: &CaveMdp, values: &[f64], tie_tolerance: f64) -> Vec<Action> {
    (0..mdp.len())
        .map(|state| {
            mdp.greedy(state, values, tie_tolerance)
                .map_or(mdp.actions[0], |(action, _)| action)
        })
        .collect()
}
