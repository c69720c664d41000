//! Dice-based skill checks for bridges and combat, and the one-shot split
//! of free skill points between the two skills.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Only the three best dice of a roll count towards the total.
const COUNTED_DICE: usize = 3;
/// Exact probabilities are computed up to this many dice; more dice are
/// treated as this many, which already saturates every threshold we use.
const MAX_EXACT_DICE: u32 = 24;

pub const BRIDGE_THRESHOLD: u32 = 12;
pub const COMBAT_THRESHOLD: u32 = 13;

/// Roll `dice` six-sided dice, sum the top three, succeed at `threshold` or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCheck {
    pub dice: u32,
    pub threshold: u32,
}

impl SkillCheck {
    pub fn bridge(agility: u32) -> Self {
        SkillCheck {
            dice: agility,
            threshold: BRIDGE_THRESHOLD,
        }
    }

    pub fn combat(fighting: u32) -> Self {
        SkillCheck {
            dice: fighting,
            threshold: COMBAT_THRESHOLD,
        }
    }

    /// Performs one trial.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let mut rolls: Vec<u32> = (0..self.dice).map(|_| rng.random_range(1..=6)).collect();
        rolls.sort_unstable_by(|a, b| b.cmp(a));
        let score: u32 = rolls.iter().take(COUNTED_DICE).sum();
        tracing::trace!(?rolls, score, threshold = self.threshold, "Skill check");
        score >= self.threshold
    }

    /// Exact success probability, found by walking every multiset of faces
    /// and weighting it by its multinomial count.
    pub fn success_probability(&self) -> f64 {
        let dice = self.dice.min(MAX_EXACT_DICE);
        if dice == 0 {
            return 0.0;
        }
        let factorials: Vec<f64> = (0..=dice)
            .scan(1.0_f64, |acc, n| {
                if n > 0 {
                    *acc *= f64::from(n);
                }
                Some(*acc)
            })
            .collect();

        let mut counts = [0u32; 6];
        let mut favourable = 0.0;
        visit_face_counts(5, dice, &mut counts, &mut |counts| {
            if top_three_sum(counts) >= self.threshold {
                let denominator: f64 = counts.iter().map(|c| factorials[*c as usize]).product();
                favourable += factorials[dice as usize] / denominator;
            }
        });
        favourable / 6f64.powi(dice as i32)
    }
}

/// Distributes `remaining` dice over faces `0..=face` (index 5 is a six).
fn visit_face_counts<F: FnMut(&[u32; 6])>(
    face: usize,
    remaining: u32,
    counts: &mut [u32; 6],
    visit: &mut F,
) {
    if face == 0 {
        counts[0] = remaining;
        visit(counts);
        counts[0] = 0;
        return;
    }
    for taken in 0..=remaining {
        counts[face] = taken;
        visit_face_counts(face - 1, remaining - taken, counts, visit);
    }
    counts[face] = 0;
}

fn top_three_sum(counts: &[u32; 6]) -> u32 {
    let mut left = COUNTED_DICE as u32;
    let mut sum = 0;
    for face in (0..6).rev() {
        let taken = counts[face].min(left);
        sum += taken * (face as u32 + 1);
        left -= taken;
        if left == 0 {
            break;
        }
    }
    sum
}

/// Points invested in each skill; each point is one die.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPoints {
    pub agility: u32,
    pub fighting: u32,
}

impl SkillPoints {
    pub fn bridge_check(&self) -> SkillCheck {
        SkillCheck::bridge(self.agility)
    }

    pub fn combat_check(&self) -> SkillCheck {
        SkillCheck::combat(self.fighting)
    }
}

/// Splits free points in proportion to the number of monsters and bridges.
///
/// Without hazards the points are halved (any odd point is dropped).
pub fn allocate_skill_points(free: u32, monsters: usize, bridges: usize) -> SkillPoints {
    let total = monsters + bridges;
    if total == 0 {
        return SkillPoints {
            agility: free / 2,
            fighting: free / 2,
        };
    }
    let fighting = (f64::from(free) * monsters as f64 / total as f64).round() as u32;
    SkillPoints {
        agility: free - fighting.min(free),
        fighting: fighting.min(free),
    }
}

/// Success probabilities the planner assumes for skill checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillOdds {
    pub bridge: f64,
    pub combat: f64,
}

impl Default for SkillOdds {
    /// Optimistic: every check succeeds, failures are handled by re-planning.
    fn default() -> Self {
        SkillOdds {
            bridge: 1.0,
            combat: 1.0,
        }
    }
}

impl SkillOdds {
    pub fn from_skill_points(points: SkillPoints) -> Self {
        SkillOdds {
            bridge: points.bridge_check().success_probability(),
            combat: points.combat_check().success_probability(),
        }
    }
}
