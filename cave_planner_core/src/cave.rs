use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Position, map::Grid};

/// Represents errors found while loading a cave map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaveError {
    #[error("Map is empty.")]
    Empty,
    #[error("Inconsistent width at row {row}: expected {expected}, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("No start position ('S') found in map.")]
    MissingStart,
    #[error("Multiple start positions ('S') found: {first} and {second}.")]
    MultipleStarts { first: Position, second: Position },
}

/// The static terrain of a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terrain {
    #[default]
    Open,
    Wall,
    /// Impassable trap; fatal if ever entered.
    Pit,
    /// Passable after a successful agility check.
    Bridge,
    /// Hostile until defeated by a successful fighting check.
    Monster,
    /// The spawn cell and the only cell where EXIT is legal.
    Entrance,
}

impl Terrain {
    /// Map code used by the game server.
    pub fn code(self) -> char {
        match self {
            Terrain::Open => ' ',
            Terrain::Wall => 'X',
            Terrain::Pit => 'P',
            Terrain::Bridge => 'B',
            Terrain::Monster => 'W',
            Terrain::Entrance => 'S',
        }
    }
}

/// A terrain kind plus the gold flag, which can sit on top of open ground.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub terrain: Terrain,
    pub gold: bool,
}

impl Cell {
    fn from_code(code: char) -> Self {
        let terrain = match code {
            'X' => Terrain::Wall,
            'P' => Terrain::Pit,
            'B' => Terrain::Bridge,
            'W' => Terrain::Monster,
            'S' => Terrain::Entrance,
            _ => Terrain::Open,
        };
        Cell {
            terrain,
            gold: code == 'G',
        }
    }

    fn code(self) -> char {
        if self.gold { 'G' } else { self.terrain.code() }
    }
}

/// An immutable cave map with the item and hazard positions derived at load time.
///
/// Hazard resolution never touches the cave: it lives in the planning state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cave {
    cells: Grid<Cell>,
    start: Position,
    gold: Vec<Position>,
    monsters: Vec<Position>,
    bridges: Vec<Position>,
}

impl Cave {
    /// Builds a cave from rows of single-character map codes.
    pub fn from_codes<R: AsRef<[char]>>(rows: &[R]) -> Result<Self, CaveError> {
        let height = rows.len();
        let width = rows.first().map(|row| row.as_ref().len()).unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(CaveError::Empty);
        }
        if let Some((row, found)) = rows
            .iter()
            .map(|row| row.as_ref().len())
            .enumerate()
            .find(|(_, len)| *len != width)
        {
            return Err(CaveError::RaggedRow {
                row,
                expected: width,
                found,
            });
        }

        let cells = Grid::from_generator(width, height, |p| Cell::from_code(rows[p.y].as_ref()[p.x]));

        let mut start: Option<Position> = None;
        let mut gold = Vec::new();
        let mut monsters = Vec::new();
        let mut bridges = Vec::new();
        for (position, cell) in cells.enumerate() {
            if cell.gold {
                gold.push(position);
            }
            match cell.terrain {
                Terrain::Entrance => {
                    if let Some(first) = start {
                        return Err(CaveError::MultipleStarts {
                            first,
                            second: position,
                        });
                    }
                    start = Some(position);
                }
                Terrain::Monster => monsters.push(position),
                Terrain::Bridge => bridges.push(position),
                _ => {}
            }
        }
        let start = start.ok_or(CaveError::MissingStart)?;

        tracing::debug!(
            width,
            height,
            gold = gold.len(),
            monsters = monsters.len(),
            bridges = bridges.len(),
            "Loaded cave"
        );

        Ok(Cave {
            cells,
            start,
            gold,
            monsters,
            bridges,
        })
    }

    /// Parses the newline-separated map string sent by the game server.
    ///
    /// Blank lines are skipped; spaces inside a row are open cells.
    pub fn parse(map: &str) -> Result<Self, CaveError> {
        let rows: Vec<Vec<char>> = map
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.trim_end_matches('\r').chars().collect())
            .collect();
        Self::from_codes(&rows)
    }

    pub fn width(&self) -> usize {
        self.cells.width()
    }

    pub fn height(&self) -> usize {
        self.cells.height()
    }

    pub fn grid(&self) -> &Grid<Cell> {
        &self.cells
    }

    /// The spawn cell, which is also the only exit.
    pub fn start(&self) -> Position {
        self.start
    }

    pub fn gold_positions(&self) -> &[Position] {
        &self.gold
    }

    pub fn monster_positions(&self) -> &[Position] {
        &self.monsters
    }

    pub fn bridge_positions(&self) -> &[Position] {
        &self.bridges
    }

    pub fn cell(&self, position: Position) -> Option<Cell> {
        self.cells.get(position).copied()
    }

    /// Terrain at `position`, or `None` when out of bounds.
    pub fn cell_kind(&self, position: Position) -> Option<Terrain> {
        self.cell(position).map(|cell| cell.terrain)
    }

    /// In bounds and neither wall nor pit.
    pub fn is_walkable(&self, position: Position) -> bool {
        matches!(
            self.cell_kind(position),
            Some(terrain) if !matches!(terrain, Terrain::Wall | Terrain::Pit)
        )
    }

    /// Every walkable cell in row-major order.
    pub fn walkable_positions(&self) -> Vec<Position> {
        self.cells
            .enumerate()
            .filter(|(_, cell)| !matches!(cell.terrain, Terrain::Wall | Terrain::Pit))
            .map(|(position, _)| position)
            .collect()
    }

    pub fn has_gold(&self, position: Position) -> bool {
        self.cell(position).is_some_and(|cell| cell.gold)
    }

    pub fn is_monster(&self, position: Position) -> bool {
        self.cell_kind(position) == Some(Terrain::Monster)
    }

    pub fn is_bridge(&self, position: Position) -> bool {
        self.cell_kind(position) == Some(Terrain::Bridge)
    }

    pub fn is_pit(&self, position: Position) -> bool {
        self.cell_kind(position) == Some(Terrain::Pit)
    }

    pub fn is_exit(&self, position: Position) -> bool {
        position == self.start
    }

    /// Renders the map with `A` marking the agent.
    pub fn render(&self, agent: Option<Position>) -> String {
        let mut out = String::with_capacity((self.width() + 1) * self.height());
        for (position, cell) in self.cells.enumerate() {
            if Some(position) == agent {
                out.push('A');
            } else {
                out.push(cell.code());
            }
            if position.x + 1 == self.width() {
                out.push('\n');
            }
        }
        out
    }
}

impl FromStr for Cave {
    type Err = CaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cave::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "XXXXX\nXSG X\nXPWBX\nXXXXX\n";

    #[test]
    fn test_parse_derives_item_sets() {
        let cave = Cave::parse(MAP).unwrap();
        assert_eq!(cave.width(), 5);
        assert_eq!(cave.height(), 4);
        assert_eq!(cave.start(), Position::new(1, 1));
        assert_eq!(cave.gold_positions(), &[Position::new(2, 1)]);
        assert_eq!(cave.monster_positions(), &[Position::new(2, 2)]);
        assert_eq!(cave.bridge_positions(), &[Position::new(3, 2)]);
    }

    #[test]
    fn test_gold_sits_on_open_ground() {
        let cave = Cave::parse(MAP).unwrap();
        let gold = cave.cell(Position::new(2, 1)).unwrap();
        assert!(gold.gold);
        assert_eq!(gold.terrain, Terrain::Open);
    }

    #[test]
    fn test_walls_and_pits_are_not_walkable() {
        let cave = Cave::parse(MAP).unwrap();
        assert!(!cave.is_walkable(Position::new(0, 0)));
        assert!(!cave.is_walkable(Position::new(1, 2)));
        assert!(!cave.is_walkable(Position::new(9, 9)));
        assert!(cave.is_walkable(Position::new(2, 2)));
        assert!(cave.is_walkable(Position::new(3, 2)));
        assert_eq!(cave.walkable_positions().len(), 5);
    }

    #[test]
    fn test_unknown_codes_are_open() {
        let cave = Cave::parse("S.?").unwrap();
        assert_eq!(cave.cell_kind(Position::new(1, 0)), Some(Terrain::Open));
        assert_eq!(cave.cell_kind(Position::new(2, 0)), Some(Terrain::Open));
    }

    #[test]
    fn test_configuration_errors() {
        assert_eq!(Cave::parse(""), Err(CaveError::Empty));
        assert_eq!(Cave::parse("\n   \n"), Err(CaveError::Empty));
        assert_eq!(Cave::parse("XXX\nX X"), Err(CaveError::MissingStart));
        assert_eq!(
            Cave::parse("SXX\nXX"),
            Err(CaveError::RaggedRow {
                row: 1,
                expected: 3,
                found: 2
            })
        );
        assert!(matches!(
            Cave::parse("S S"),
            Err(CaveError::MultipleStarts { .. })
        ));
    }

    #[test]
    fn test_render_marks_agent() {
        let cave = Cave::parse("SG\nXX").unwrap();
        assert_eq!(cave.render(Some(Position::new(1, 0))), "SA\nXX\n");
        assert_eq!(cave.render(None), "SG\nXX\n");
    }
}
