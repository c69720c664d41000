use serde::{Deserialize, Serialize};

use crate::{Action, skill::SkillOdds};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Discount factor must lie in (0, 1), got {0}")]
    Gamma(f64),
    #[error("Convergence threshold must be positive, got {0}")]
    Epsilon(f64),
    #[error("Tie tolerance must be non-negative, got {0}")]
    TieTolerance(f64),
    #[error("{0} must be at least 1")]
    ZeroCap(&'static str),
    #[error("Skill odds must lie in [0, 1], got {name} = {value}")]
    Odds { name: &'static str, value: f64 },
    #[error("Default action {0} is not in the action vocabulary")]
    DefaultAction(Action),
}

/// How movement actions resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementModel {
    /// The agent always lands on the intended cell (or bumps).
    #[default]
    Deterministic,
    /// The agent slips to a perpendicular cell 20% of the time.
    Stochastic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    PolicyIteration,
    ValueIteration,
}

/// Additive reward terms of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    /// Charged for every action taken.
    pub step: f64,
    /// Extra charge when a move leaves the agent where it stood.
    pub bump: f64,
    pub gold: f64,
    pub combat: f64,
    /// Walking into a live monster.
    pub monster: f64,
    pub pit: f64,
    pub exit_per_gold: f64,
    pub full_clear: f64,
}

impl Default for RewardTable {
    fn default() -> Self {
        RewardTable {
            step: -0.1,
            bump: -0.5,
            gold: 10.0,
            combat: 15.0,
            monster: -50.0,
            pit: -100.0,
            exit_per_gold: 10.0,
            full_clear: 100.0,
        }
    }
}

/// Everything a solve depends on besides the cave itself.
///
/// Passed explicitly so that two solves with the same config and cave are
/// bit-for-bit reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Discount factor γ.
    pub gamma: f64,
    /// Convergence threshold ε on the largest per-sweep value change.
    pub epsilon: f64,
    /// Sweep cap for one policy evaluation; value iteration gets ten times this.
    pub max_sweeps: usize,
    /// Cap on policy-improvement rounds.
    pub max_iterations: usize,
    /// Action values closer than this to the best count as ties.
    pub tie_tolerance: f64,
    pub movement: MovementModel,
    /// Adds FIGHT to the vocabulary and tracks resolved monsters.
    pub hazard_aware: bool,
    pub algorithm: Algorithm,
    pub rewards: RewardTable,
    pub odds: SkillOdds,
    /// Returned when the current state is missing from the policy.
    pub default_action: Action,
    /// Cap on gold plus unresolved hazards; the state space doubles per item.
    pub max_items: usize,
    /// Seeds the random initial policy of policy iteration.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            gamma: 0.95,
            epsilon: 1e-6,
            max_sweeps: 1000,
            max_iterations: 1000,
            tie_tolerance: 1e-4,
            movement: MovementModel::Deterministic,
            hazard_aware: true,
            algorithm: Algorithm::PolicyIteration,
            rewards: RewardTable::default(),
            odds: SkillOdds::default(),
            default_action: Action::North,
            max_items: 16,
            seed: 0,
        }
    }
}

impl SolverConfig {
    pub fn vocabulary(&self) -> &'static [Action] {
        Action::vocabulary(self.hazard_aware)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ConfigError::Gamma(self.gamma));
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::Epsilon(self.epsilon));
        }
        if !(self.tie_tolerance >= 0.0) {
            return Err(ConfigError::TieTolerance(self.tie_tolerance));
        }
        if self.max_sweeps == 0 {
            return Err(ConfigError::ZeroCap("max_sweeps"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCap("max_iterations"));
        }
        for (name, value) in [("bridge", self.odds.bridge), ("combat", self.odds.combat)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Odds { name, value });
            }
        }
        if !self.vocabulary().contains(&self.default_action) {
            return Err(ConfigError::DefaultAction(self.default_action));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SolverConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_gamma = SolverConfig {
            gamma: 1.0,
            ..SolverConfig::default()
        };
        assert_eq!(bad_gamma.validate(), Err(ConfigError::Gamma(1.0)));

        let bad_epsilon = SolverConfig {
            epsilon: 0.0,
            ..SolverConfig::default()
        };
        assert_eq!(bad_epsilon.validate(), Err(ConfigError::Epsilon(0.0)));

        let bad_odds = SolverConfig {
            odds: SkillOdds {
                bridge: 1.5,
                combat: 1.0,
            },
            ..SolverConfig::default()
        };
        assert!(matches!(
            bad_odds.validate(),
            Err(ConfigError::Odds { name: "bridge", .. })
        ));

        let no_fight = SolverConfig {
            hazard_aware: false,
            default_action: Action::Fight,
            ..SolverConfig::default()
        };
        assert_eq!(
            no_fight.validate(),
            Err(ConfigError::DefaultAction(Action::Fight))
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SolverConfig =
            serde_json::from_str(r#"{"gamma": 0.99, "movement": "Stochastic"}"#).unwrap();
        assert_eq!(config.gamma, 0.99);
        assert_eq!(config.movement, MovementModel::Stochastic);
        assert_eq!(config.epsilon, 1e-6);
        assert_eq!(config.rewards, RewardTable::default());
    }
}
