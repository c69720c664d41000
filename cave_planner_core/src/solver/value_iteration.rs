use super::{CaveMdp, Policy, Solution, SolveReport, Solver, ValueTable, greedy_policy};
use crate::config::{Algorithm, SolverConfig};

/// Value iteration gets this many times the policy-evaluation sweep cap.
const SWEEP_CAP_FACTOR: usize = 10;

/// Bellman optimality sweeps until values settle, then one greedy
/// extraction with the same tie-break as policy iteration.
#[derive(Debug, Clone)]
pub struct ValueIteration {
    epsilon: f64,
    max_sweeps: usize,
    tie_tolerance: f64,
}

impl ValueIteration {
    pub fn new(config: &SolverConfig) -> Self {
        ValueIteration {
            epsilon: config.epsilon,
            max_sweeps: config.max_sweeps.saturating_mul(SWEEP_CAP_FACTOR),
            tie_tolerance: config.tie_tolerance,
        }
    }
}

impl Solver for ValueIteration {
    fn solve(&self, mdp: &CaveMdp) -> Solution {
        let mut table = ValueTable::zeros(mdp.space().clone());
        let values = table.as_mut_slice();
        let actions = mdp.actions();

        let mut sweeps = 0;
        let mut delta = f64::INFINITY;
        while sweeps < self.max_sweeps && delta >= self.epsilon {
            sweeps += 1;
            delta = 0.0;
            for state in 0..mdp.len() {
                let best = actions
                    .iter()
                    .filter_map(|action| mdp.lookahead(state, *action, values))
                    .fold(f64::NEG_INFINITY, f64::max);
                if best.is_finite() {
                    delta = f64::max(delta, (best - values[state]).abs());
                    values[state] = best;
                }
            }
        }

        let converged = delta < self.epsilon;
        tracing::debug!(sweeps, delta, converged, "Value iteration finished");
        if !converged {
            tracing::warn!(
                sweeps,
                delta,
                "Value iteration hit its sweep cap before converging; using the best policy so far"
            );
        }

        let actions = greedy_policy(mdp, table.as_slice(), self.tie_tolerance);
        Solution {
            policy: Policy::new(mdp.space().clone(), actions),
            values: table,
            report: SolveReport {
                algorithm: Algorithm::ValueIteration,
                converged,
                iterations: 1,
                sweeps,
                final_delta: delta,
                last_changes: 0,
            },
        }
    }
}
