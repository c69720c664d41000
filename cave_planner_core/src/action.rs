use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Direction;

/// Represents actions the agent can send to the game server.
///
/// The declaration order is the enumeration order used to break ties
/// between equally valued actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    North,
    South,
    East,
    West,
    Exit,
    Fight,
}

impl Action {
    /// Vocabulary without combat.
    pub const BASIC: [Action; 5] = [
        Action::North,
        Action::South,
        Action::East,
        Action::West,
        Action::Exit,
    ];

    /// Vocabulary for maps with monsters.
    pub const WITH_FIGHT: [Action; 6] = [
        Action::North,
        Action::South,
        Action::East,
        Action::West,
        Action::Exit,
        Action::Fight,
    ];

    pub fn vocabulary(hazard_aware: bool) -> &'static [Action] {
        if hazard_aware {
            &Self::WITH_FIGHT
        } else {
            &Self::BASIC
        }
    }

    /// Heading of a movement action, `None` for EXIT and FIGHT.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Action::North => Some(Direction::North),
            Action::South => Some(Direction::South),
            Action::East => Some(Direction::East),
            Action::West => Some(Direction::West),
            Action::Exit | Action::Fight => None,
        }
    }

    pub fn is_movement(self) -> bool {
        self.direction().is_some()
    }

    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::North => Action::North,
            Direction::South => Action::South,
            Direction::East => Action::East,
            Direction::West => Action::West,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::North => "NORTH",
            Action::South => "SOUTH",
            Action::East => "EAST",
            Action::West => "WEST",
            Action::Exit => "EXIT",
            Action::Fight => "FIGHT",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::WITH_FIGHT
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_order() {
        assert_eq!(Action::vocabulary(false).len(), 5);
        assert_eq!(Action::vocabulary(true).last(), Some(&Action::Fight));
        assert_eq!(Action::vocabulary(true)[..5], Action::BASIC);
    }

    #[test]
    fn test_wire_names_round_trip() {
        for action in Action::WITH_FIGHT {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
        assert_eq!("exit".parse::<Action>(), Ok(Action::Exit));
        assert!("JUMP".parse::<Action>().is_err());
    }
}
