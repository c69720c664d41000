use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};

use super::{CaveMdp, Policy, Solution, SolveReport, Solver, ValueTable};
use crate::{
    Action,
    config::{Algorithm, SolverConfig},
};

/// Alternates in-place policy evaluation with greedy improvement until no
/// state changes its action.
#[derive(Debug, Clone)]
pub struct PolicyIteration {
    epsilon: f64,
    max_sweeps: usize,
    max_iterations: usize,
    tie_tolerance: f64,
    seed: u64,
}

/// Result of one policy evaluation.
struct Evaluation {
    sweeps: usize,
    delta: f64,
    converged: bool,
}

impl PolicyIteration {
    pub fn new(config: &SolverConfig) -> Self {
        PolicyIteration {
            epsilon: config.epsilon,
            max_sweeps: config.max_sweeps,
            max_iterations: config.max_iterations,
            tie_tolerance: config.tie_tolerance,
            seed: config.seed,
        }
    }

    /// A seeded random choice among each state's applicable actions.
    pub fn initial_policy(&self, mdp: &CaveMdp) -> Policy {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let actions = (0..mdp.len())
            .map(|state| {
                let applicable: Vec<Action> = mdp
                    .actions()
                    .iter()
                    .copied()
                    .filter(|action| mdp.is_applicable(state, *action))
                    .collect();
                applicable
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(mdp.actions()[0])
            })
            .collect();
        Policy::new(mdp.space().clone(), actions)
    }

    /// Runs policy iteration starting from `policy` and `values`, which must
    /// belong to `mdp`'s state space.
    pub fn solve_from(&self, mdp: &CaveMdp, policy: Policy, values: ValueTable) -> Solution {
        let mut policy = policy;
        let mut values = values;
        let mut sweeps = 0;
        let mut iterations = 0;
        let mut last_changes = 0;
        let mut final_delta = 0.0;
        let mut evaluated = false;
        let mut stable = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let evaluation = self.evaluate(mdp, &policy, &mut values);
            sweeps += evaluation.sweeps;
            final_delta = evaluation.delta;
            evaluated = evaluation.converged;

            last_changes = self.improve(mdp, &mut policy, &values);
            tracing::debug!(
                iteration = iterations,
                sweeps = evaluation.sweeps,
                delta = evaluation.delta,
                changed = last_changes,
                "Policy iteration round"
            );
            if last_changes == 0 {
                stable = true;
                break;
            }
        }

        let report = SolveReport {
            algorithm: Algorithm::PolicyIteration,
            converged: stable && evaluated,
            iterations,
            sweeps,
            final_delta,
            last_changes,
        };
        if !report.converged {
            tracing::warn!(
                iterations,
                sweeps,
                final_delta,
                last_changes,
                "Policy iteration hit its cap before converging; using the best policy so far"
            );
        }
        Solution {
            policy,
            values,
            report,
        }
    }

    /// In-place sweeps under the fixed `policy` until the largest change
    /// drops below epsilon or the sweep cap is reached.
    fn evaluate(&self, mdp: &CaveMdp, policy: &Policy, values: &mut ValueTable) -> Evaluation {
        let values = values.as_mut_slice();
        let mut delta = f64::INFINITY;
        for sweep in 1..=self.max_sweeps {
            delta = 0.0;
            for (state, action) in policy.as_slice().iter().enumerate() {
                let updated = mdp.lookahead(state, *action, values).unwrap_or(0.0);
                delta = f64::max(delta, (updated - values[state]).abs());
                values[state] = updated;
            }
            if delta < self.epsilon {
                return Evaluation {
                    sweeps: sweep,
                    delta,
                    converged: true,
                };
            }
        }
        Evaluation {
            sweeps: self.max_sweeps,
            delta,
            converged: false,
        }
    }

    /// Makes `policy` greedy with respect to `values`; returns how many
    /// states changed their action.
    fn improve(&self, mdp: &CaveMdp, policy: &mut Policy, values: &ValueTable) -> usize {
        let mut changed = 0;
        for state in 0..mdp.len() {
            let Some((best, _)) = mdp.greedy(state, values.as_slice(), self.tie_tolerance) else {
                continue;
            };
            if policy.actions[state] != best {
                policy.actions[state] = best;
                changed += 1;
            }
        }
        changed
    }
}

impl Solver for PolicyIteration {
    fn solve(&self, mdp: &CaveMdp) -> Solution {
        let policy = self.initial_policy(mdp);
        let values = ValueTable::zeros(mdp.space().clone());
        self.solve_from(mdp, policy, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Position, cave::Cave, state::PositionSet, state::State};

    fn p(x: usize, y: usize) -> Position {
        Position::new(x, y)
    }

    #[test]
    fn test_corridor_policy() {
        let cave = Cave::parse("XXXXX\nXS.GX\nXXXXX").unwrap();
        let config = SolverConfig::default();
        let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
        let solution = PolicyIteration::new(&config).solve(&mdp);
        assert!(solution.report.converged);

        let empty = PositionSet::new();
        let gold: PositionSet = [p(3, 1)].into_iter().collect();
        let policy = &solution.policy;
        assert_eq!(policy.action(&State::new(p(1, 1), empty.clone(), empty.clone())), Some(Action::East));
        assert_eq!(policy.action(&State::new(p(2, 1), empty.clone(), empty.clone())), Some(Action::East));
        assert_eq!(policy.action(&State::new(p(3, 1), gold.clone(), empty.clone())), Some(Action::West));
        assert_eq!(policy.action(&State::new(p(2, 1), gold.clone(), empty.clone())), Some(Action::West));
        assert_eq!(policy.action(&State::new(p(1, 1), gold, empty)), Some(Action::Exit));
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let cave = Cave::parse("XXXXXXX\nXS...GX\nXXXXXXX").unwrap();
        let config = SolverConfig {
            max_iterations: 1,
            max_sweeps: 2,
            ..SolverConfig::default()
        };
        let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
        let solution = PolicyIteration::new(&config).solve(&mdp);
        assert!(!solution.report.converged);
        assert_eq!(solution.report.iterations, 1);
        assert_eq!(solution.policy.len(), mdp.len());
    }

    #[test]
    fn test_same_seed_same_solution() {
        let cave = Cave::parse("XXXXX\nXSG.X\nX.W.X\nXXXXX").unwrap();
        let config = SolverConfig {
            seed: 42,
            ..SolverConfig::default()
        };
        let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
        let solver = PolicyIteration::new(&config);
        let a = solver.solve(&mdp);
        let b = solver.solve(&mdp);
        assert_eq!(a.policy.as_slice(), b.policy.as_slice());
        assert_eq!(a.values.as_slice(), b.values.as_slice());
    }
}
