//! The re-planning driver.
//!
//! Each decision request carries the map and the whole episode history. The
//! planner replays the history into the agent's current state, solves (or
//! reuses) the MDP for the hazards resolved so far, and answers with one
//! action after applying a couple of guards the optimal policy alone does
//! not give.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    Action, Position,
    cave::{Cave, CaveError},
    config::{ConfigError, SolverConfig},
    history::{EpisodeState, Event},
    path::{direction_between, nearest_reachable},
    skill::{SkillPoints, allocate_skill_points},
    solver::{CaveMdp, MdpError, Solution, solver_for},
    state::{PositionSet, State},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    #[error("Invalid cave: {0}")]
    Cave(#[from] CaveError),
    #[error("Invalid solver config: {0}")]
    Config(#[from] ConfigError),
    #[error("State space too large: {items} gold and hazard items exceed the limit of {limit}")]
    StateSpaceTooLarge { items: usize, limit: usize },
    #[error("Action {action} from {state:?} leads outside the enumerated state space")]
    MissingSuccessor { state: State, action: Action },
}

impl From<MdpError> for PlannerError {
    fn from(err: MdpError) -> Self {
        match err {
            MdpError::TooManyItems(too_many) => PlannerError::StateSpaceTooLarge {
                items: too_many.items,
                limit: too_many.limit,
            },
            MdpError::MissingSuccessor { state, action } => {
                PlannerError::MissingSuccessor { state, action }
            }
        }
    }
}

/// One request from the game server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DecisionRequest {
    pub map: String,
    #[serde(default)]
    pub history: Vec<Event>,
    #[serde(default)]
    pub skill_points: SkillPoints,
    #[serde(default)]
    pub free_skill_points: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// How to spend the free skill points.
    Allocate(SkillPoints),
    Act(Action),
}

/// A solved MDP for one cave and one baseline of resolved hazards.
#[derive(Debug)]
pub struct PlannedSolve {
    pub mdp: CaveMdp,
    pub solution: Solution,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    cave: Cave,
    baseline: PositionSet,
}

pub struct Planner {
    config: SolverConfig,
    cache: HashMap<CacheKey, Arc<PlannedSolve>>,
    last_key: Option<CacheKey>,
}

impl Planner {
    pub fn new(config: SolverConfig) -> Result<Self, PlannerError> {
        config.validate()?;
        Ok(Planner {
            config,
            cache: HashMap::new(),
            last_key: None,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Number of distinct solves held in the cache.
    pub fn cached_solves(&self) -> usize {
        self.cache.len()
    }

    /// The solve used for the most recent decision.
    pub fn last_solve(&self) -> Option<Arc<PlannedSolve>> {
        self.last_key
            .as_ref()
            .and_then(|key| self.cache.get(key))
            .cloned()
    }

    /// The solve for `cave` with `baseline` hazards already resolved,
    /// computing it on a cache miss.
    ///
    /// Only solves for `cave` are kept, and of those only baselines that are
    /// not strictly contained in `baseline`: resolved sets never shrink
    /// within an episode.
    pub fn solution_for(&mut self, cave: &Cave, baseline: &PositionSet) -> Result<Arc<PlannedSolve>, PlannerError> {
        let key = CacheKey {
            cave: cave.clone(),
            baseline: baseline.clone(),
        };
        if let Some(last) = &self.last_key {
            if last.cave == key.cave && last.baseline != key.baseline {
                tracing::info!(
                    resolved = baseline.len(),
                    "Hazard configuration changed since the last solve; re-planning"
                );
            }
        }
        let before = self.cache.len();
        self.cache.retain(|cached, _| {
            cached.cave == key.cave
                && (cached.baseline == key.baseline || !cached.baseline.is_subset(&key.baseline))
        });
        if self.cache.len() < before {
            tracing::debug!(evicted = before - self.cache.len(), "Dropped stale solves");
        }
        self.last_key = Some(key.clone());

        if let Some(planned) = self.cache.get(&key) {
            tracing::debug!(resolved = baseline.len(), "Reusing cached solve");
            return Ok(Arc::clone(planned));
        }

        let mdp = CaveMdp::build(cave, &self.config, baseline)?;
        let solution = solver_for(&self.config).solve(&mdp);
        let report = &solution.report;
        tracing::info!(
            algorithm = ?report.algorithm,
            states = mdp.len(),
            iterations = report.iterations,
            sweeps = report.sweeps,
            converged = report.converged,
            "Solved cave"
        );

        let planned = Arc::new(PlannedSolve { mdp, solution });
        self.cache.insert(key, Arc::clone(&planned));
        Ok(planned)
    }

    /// Answers one server request.
    pub fn decide(&mut self, request: &DecisionRequest) -> Result<Decision, PlannerError> {
        let cave = Cave::parse(&request.map)?;
        if request.free_skill_points > 0 {
            let points = allocate_skill_points(
                request.free_skill_points,
                cave.monster_positions().len(),
                cave.bridge_positions().len(),
            );
            tracing::info!(
                agility = points.agility,
                fighting = points.fighting,
                "Allocated free skill points"
            );
            return Ok(Decision::Allocate(points));
        }

        let episode = EpisodeState::replay(&cave, &request.history);
        self.act(&cave, &episode).map(Decision::Act)
    }

    /// The action to take in `episode`'s current state.
    pub fn act(&mut self, cave: &Cave, episode: &EpisodeState) -> Result<Action, PlannerError> {
        let planned = self.solution_for(cave, &episode.resolved)?;
        let state = episode.to_state();
        let Some(index) = planned.mdp.space().index_of(&state) else {
            tracing::warn!(
                position = %state.position,
                default = %self.config.default_action,
                "Current state is not in the solved state space; using the default action"
            );
            return Ok(self.config.default_action);
        };

        let values = planned.solution.values.as_slice();
        let mut action = planned.solution.policy.as_slice()[index];

        if action == Action::Exit && !cave.is_exit(state.position) {
            if let Some((replacement, _)) = planned.mdp.best_excluding(index, values, Action::Exit) {
                tracing::warn!(
                    position = %state.position,
                    replacement = %replacement,
                    "Policy chose EXIT away from the exit"
                );
                action = replacement;
            }
        }

        if abandons_gold(&planned, index) {
            if let Some((gold, step)) = self.step_towards_gold(cave, episode) {
                tracing::warn!(
                    gold = %gold,
                    step = %step,
                    "Policy leaves reachable gold behind; heading for it instead"
                );
                action = step;
            }
        }

        tracing::info!(
            position = %state.position,
            collected = state.collected.len(),
            resolved = state.resolved.len(),
            action = %action,
            value = values[index],
            "Decided"
        );
        Ok(action)
    }

    /// First step of the shortest path to the nearest uncollected gold, if any
    /// is reachable. Bridges count as passable unless crossing never succeeds.
    fn step_towards_gold(&self, cave: &Cave, episode: &EpisodeState) -> Option<(Position, Action)> {
        let remaining = episode.remaining_gold(cave);
        let bridges_passable = self.config.odds.bridge > 0.0;
        let (gold, path) = nearest_reachable(cave, episode.position, &remaining, |cell| {
            bridges_passable || !cave.is_bridge(cell)
        })?;
        let next = *path.get(1)?;
        let direction = direction_between(episode.position, next)?;
        Some((gold, Action::from_direction(direction)))
    }
}

/// Whether following the policy from `index`, taking the most likely outcome
/// of each action, leaves the cave before any more gold is collected.
fn abandons_gold(planned: &PlannedSolve, index: usize) -> bool {
    let states = planned.mdp.space().states();
    let policy = planned.solution.policy.as_slice();
    let collected = states[index].collected.len();
    let mut visited = vec![false; states.len()];
    let mut current = index;
    loop {
        if visited[current] {
            return false;
        }
        visited[current] = true;
        match planned.mdp.likely_successor(current, policy[current]) {
            Some(Some(next)) if states[next].collected.len() > collected => return false,
            Some(Some(next)) => current = next,
            Some(None) => return true,
            None => return false,
        }
    }
}
