//! Episode history as reported by the game server, and its replay into the
//! agent's current situation.

use serde::{Deserialize, Serialize};

use crate::{
    Action, Position,
    cave::Cave,
    state::{PositionSet, State},
};

/// What the server observed after an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_gold_at: Option<Position>,
    #[serde(
        default,
        rename = "killed-wumpus-at",
        skip_serializing_if = "Option::is_none"
    )]
    pub killed_monster_at: Option<Position>,
}

/// One entry of the history: the action taken (absent for the opening
/// entry) and its outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default)]
    pub outcome: Outcome,
}

/// Where the agent stands and what it has changed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeState {
    pub position: Position,
    pub collected: PositionSet,
    pub resolved: PositionSet,
}

impl EpisodeState {
    /// The situation before any action: at the entrance, nothing changed.
    pub fn initial(cave: &Cave) -> Self {
        EpisodeState {
            position: cave.start(),
            collected: PositionSet::new(),
            resolved: PositionSet::new(),
        }
    }

    /// Folds `events` in order. Both sets only ever grow.
    pub fn replay(cave: &Cave, events: &[Event]) -> Self {
        let mut episode = EpisodeState::initial(cave);
        for event in events {
            episode.apply(cave, event);
        }
        episode
    }

    pub fn apply(&mut self, cave: &Cave, event: &Event) {
        let outcome = &event.outcome;
        if let Some(position) = outcome.position {
            if cave.grid().contains(position) {
                self.position = position;
            } else {
                tracing::warn!(%position, "Reported position is outside the cave; ignoring it");
            }
        }
        if let Some(gold) = outcome.collected_gold_at {
            if cave.has_gold(gold) {
                self.collected.insert(gold);
            } else {
                tracing::warn!(position = %gold, "Reported gold at a cell without gold; ignoring it");
            }
        }
        if let Some(monster) = outcome.killed_monster_at {
            if cave.is_monster(monster) {
                self.resolved.insert(monster);
            } else {
                tracing::warn!(position = %monster, "Reported kill at a cell without a monster; ignoring it");
            }
        }
    }

    /// Gold not yet collected, in map order.
    pub fn remaining_gold(&self, cave: &Cave) -> Vec<Position> {
        cave.gold_positions()
            .iter()
            .copied()
            .filter(|gold| !self.collected.contains(*gold))
            .collect()
    }

    pub fn to_state(&self) -> State {
        State::new(self.position, self.collected.clone(), self.resolved.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "SGW\n.G.";

    fn p(x: usize, y: usize) -> Position {
        Position::new(x, y)
    }

    fn event(json: &str) -> Event {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parses_server_events() {
        let e = event(r#"{"action": "EAST", "outcome": {"position": [1, 0], "collected-gold-at": [1, 0]}}"#);
        assert_eq!(e.action, Some(Action::East));
        assert_eq!(e.outcome.position, Some(p(1, 0)));
        assert_eq!(e.outcome.collected_gold_at, Some(p(1, 0)));
        assert_eq!(e.outcome.killed_monster_at, None);

        let opening = event(r#"{"outcome": {"position": [0, 0]}}"#);
        assert_eq!(opening.action, None);
    }

    #[test]
    fn test_replay_accumulates() {
        let cave = Cave::parse(MAP).unwrap();
        let events = vec![
            event(r#"{"action": "EAST", "outcome": {"position": [1, 0], "collected-gold-at": [1, 0]}}"#),
            event(r#"{"action": "FIGHT", "outcome": {"killed-wumpus-at": [2, 0]}}"#),
            event(r#"{"action": "SOUTH", "outcome": {"position": [1, 1], "collected-gold-at": [1, 1]}}"#),
        ];
        let episode = EpisodeState::replay(&cave, &events);
        assert_eq!(episode.position, p(1, 1));
        assert_eq!(episode.collected, [p(1, 0), p(1, 1)].into_iter().collect());
        assert_eq!(episode.resolved, [p(2, 0)].into_iter().collect());
        assert!(episode.remaining_gold(&cave).is_empty());
    }

    #[test]
    fn test_replay_is_monotone() {
        let cave = Cave::parse(MAP).unwrap();
        let events = vec![
            event(r#"{"action": "EAST", "outcome": {"position": [1, 0], "collected-gold-at": [1, 0]}}"#),
            event(r#"{"action": "FIGHT", "outcome": {"killed-wumpus-at": [2, 0]}}"#),
            event(r#"{"action": "WEST", "outcome": {"position": [0, 0]}}"#),
            event(r#"{"action": "EXIT", "outcome": {}}"#),
        ];
        let mut previous = EpisodeState::initial(&cave);
        for end in 1..=events.len() {
            let episode = EpisodeState::replay(&cave, &events[..end]);
            assert!(previous.collected.is_subset(&episode.collected));
            assert!(previous.resolved.is_subset(&episode.resolved));
            previous = episode;
        }
        assert_eq!(previous.position, p(0, 0));
    }

    #[test]
    fn test_bogus_reports_are_ignored() {
        let cave = Cave::parse(MAP).unwrap();
        let events = vec![event(
            r#"{"action": "NORTH", "outcome": {"position": [9, 9], "collected-gold-at": [0, 1], "killed-wumpus-at": [1, 0]}}"#,
        )];
        let episode = EpisodeState::replay(&cave, &events);
        assert_eq!(episode, EpisodeState::initial(&cave));
    }
}
