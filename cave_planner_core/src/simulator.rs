//! A local stand-in for the game server.
//!
//! Applies actions to a cave with real dice rolls and reports each outcome
//! as a history [`Event`], so the planner can be driven end to end.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    Action, Direction, Position,
    cave::Cave,
    config::{MovementModel, SolverConfig},
    history::{Event, Outcome},
    model::TransitionModel,
    skill::{SkillOdds, SkillPoints},
    state::{PositionSet, State},
};

#[derive(Debug, Clone)]
pub struct CaveSimulator {
    cave: Cave,
    skills: SkillPoints,
    /// Carries the movement model and reward table. Its odds are 1.0 so the
    /// landing distribution is free of bridge checks, which are rolled here.
    model_config: SolverConfig,
    rng: StdRng,
    position: Position,
    collected: PositionSet,
    resolved: PositionSet,
    steps: usize,
    total_reward: f64,
    finished: bool,
}

impl CaveSimulator {
    pub fn new(cave: Cave, skills: SkillPoints, movement: MovementModel, seed: u64) -> Self {
        let model_config = SolverConfig {
            movement,
            odds: SkillOdds {
                bridge: 1.0,
                combat: 1.0,
            },
            ..SolverConfig::default()
        };
        let position = cave.start();
        CaveSimulator {
            cave,
            skills,
            model_config,
            rng: StdRng::seed_from_u64(seed),
            position,
            collected: PositionSet::new(),
            resolved: PositionSet::new(),
            steps: 0,
            total_reward: 0.0,
            finished: false,
        }
    }

    pub fn cave(&self) -> &Cave {
        &self.cave
    }

    pub fn skills(&self) -> SkillPoints {
        self.skills
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn collected(&self) -> &PositionSet {
        &self.collected
    }

    pub fn resolved(&self) -> &PositionSet {
        &self.resolved
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Sum of the rewards of every transition so far, under the default
    /// reward table.
    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The opening history entry: where the agent spawned.
    pub fn opening_event(&self) -> Event {
        Event {
            action: None,
            outcome: Outcome {
                position: Some(self.cave.start()),
                ..Outcome::default()
            },
        }
    }

    fn state(&self) -> State {
        State::new(self.position, self.collected.clone(), self.resolved.clone())
    }

    /// Applies `action` and reports what happened. Once the agent has
    /// exited, every further action is ignored.
    pub fn step(&mut self, action: Action) -> Event {
        let mut outcome = Outcome::default();
        if self.finished {
            tracing::warn!(%action, "Episode already finished; ignoring action");
            return Event {
                action: Some(action),
                outcome,
            };
        }

        let before = self.state();
        match action {
            Action::Exit => {
                if self.cave.is_exit(self.position) {
                    self.finished = true;
                    tracing::info!(
                        steps = self.steps + 1,
                        gold = self.collected.len(),
                        "Agent left the cave"
                    );
                }
            }
            Action::Fight => {
                if self.cave.is_monster(self.position) && !self.resolved.contains(self.position) {
                    if self.skills.combat_check().roll(&mut self.rng) {
                        self.resolved.insert(self.position);
                        outcome.killed_monster_at = Some(self.position);
                        tracing::debug!(position = %self.position, "Monster defeated");
                    } else {
                        tracing::debug!(position = %self.position, "Fight lost");
                    }
                }
            }
            _ => {
                if let Some(direction) = action.direction() {
                    let landing = self.sample_landing(direction);
                    if landing != self.position && self.cave.is_bridge(landing) {
                        if self.skills.bridge_check().roll(&mut self.rng) {
                            self.position = landing;
                        } else {
                            tracing::debug!(position = %landing, "Bridge crossing failed");
                        }
                    } else {
                        self.position = landing;
                    }
                    if self.cave.has_gold(self.position) && self.collected.insert(self.position) {
                        outcome.collected_gold_at = Some(self.position);
                    }
                }
            }
        }

        let after = self.state();
        let model = TransitionModel::new(&self.cave, &self.model_config);
        self.total_reward += model.reward(&before, action, &after);
        self.steps += 1;
        outcome.position = Some(self.position);
        Event {
            action: Some(action),
            outcome,
        }
    }

    fn sample_landing(&mut self, direction: Direction) -> Position {
        let model = TransitionModel::new(&self.cave, &self.model_config);
        let outcomes = model.landing_distribution(self.position, direction);
        let mut roll: f64 = self.rng.random();
        for (cell, probability) in &outcomes {
            if roll < *probability {
                return *cell;
            }
            roll -= probability;
        }
        outcomes.last().map_or(self.position, |(cell, _)| *cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: usize, y: usize) -> Position {
        Position::new(x, y)
    }

    fn simulator(map: &str, skills: SkillPoints) -> CaveSimulator {
        CaveSimulator::new(Cave::parse(map).unwrap(), skills, MovementModel::Deterministic, 7)
    }

    #[test]
    fn test_moves_and_collects() {
        let mut sim = simulator("S.G", SkillPoints::default());
        let first = sim.step(Action::East);
        assert_eq!(first.outcome.position, Some(p(1, 0)));
        assert_eq!(first.outcome.collected_gold_at, None);
        let second = sim.step(Action::East);
        assert_eq!(second.outcome.collected_gold_at, Some(p(2, 0)));
        let bump = sim.step(Action::East);
        assert_eq!(bump.outcome.position, Some(p(2, 0)));
        assert_eq!(bump.outcome.collected_gold_at, None);
        assert_eq!(sim.collected().len(), 1);
    }

    #[test]
    fn test_exit_only_at_the_entrance() {
        let mut sim = simulator("S.", SkillPoints::default());
        sim.step(Action::East);
        sim.step(Action::Exit);
        assert!(!sim.is_finished());
        sim.step(Action::West);
        sim.step(Action::Exit);
        assert!(sim.is_finished());
        let ignored = sim.step(Action::East);
        assert_eq!(ignored.outcome.position, None);
        assert_eq!(sim.position(), p(0, 0));
    }

    #[test]
    fn test_skill_checks_gate_bridges_and_fights() {
        // Zero dice never reach a threshold.
        let mut weak = simulator("SBW", SkillPoints::default());
        for _ in 0..5 {
            assert_eq!(weak.step(Action::East).outcome.position, Some(p(0, 0)));
        }

        // Twenty dice all but guarantee both checks.
        let strong_skills = SkillPoints {
            agility: 20,
            fighting: 20,
        };
        let mut strong = simulator("SBW", strong_skills);
        strong.step(Action::East);
        strong.step(Action::East);
        assert_eq!(strong.position(), p(2, 0));
        let fight = strong.step(Action::Fight);
        assert_eq!(fight.outcome.killed_monster_at, Some(p(2, 0)));
        let again = strong.step(Action::Fight);
        assert_eq!(again.outcome.killed_monster_at, None);
    }

    #[test]
    fn test_stochastic_slips_are_reproducible() {
        let cave = Cave::parse("...\n.S.\n...").unwrap();
        let run = |seed| {
            let mut sim = CaveSimulator::new(cave.clone(), SkillPoints::default(), MovementModel::Stochastic, seed);
            let moves = [Action::North, Action::South, Action::East, Action::West];
            (0..100)
                .map(|i| sim.step(moves[i % moves.len()]).outcome.position.unwrap())
                .collect::<Vec<_>>()
        };
        let positions = run(11);
        assert!(positions.iter().all(|position| cave.is_walkable(*position)));
        assert_eq!(positions, run(11));
    }
}
