use serde::{Deserialize, Serialize};

/// Random 128-bit id for one live connection.
///
/// Not a wire concept: identities are addressed by their record-store id.
/// The gateway uses this to tell a superseded connection's teardown apart
/// from its successor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u128);

impl ConnId {
    pub fn from_be_bytes(b: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(b))
    }

    pub fn short(self) -> u64 {
        // Good enough for logs: XOR high/low halves.
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.short())
    }
}

/// Integer grid coordinates inside a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Eight-way facing. Avatars face the direction they last moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    #[default]
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// Facing for a step from one tile toward another. `None` when the
    /// positions are equal.
    pub fn from_step(from: Position, to: Position) -> Option<Self> {
        let dx = (to.x - from.x).signum();
        let dy = (to.y - from.y).signum();
        match (dx, dy) {
            (0, -1) => Some(Direction::North),
            (1, -1) => Some(Direction::NorthEast),
            (1, 0) => Some(Direction::East),
            (1, 1) => Some(Direction::SouthEast),
            (0, 1) => Some(Direction::South),
            (-1, 1) => Some(Direction::SouthWest),
            (-1, 0) => Some(Direction::West),
            (-1, -1) => Some(Direction::NorthWest),
            _ => None,
        }
    }
}

/// Chat visibility modes, from broadest to narrowest audience.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Normal,
    Shout,
    Whisper,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Normal => "normal",
            ChatMode::Shout => "shout",
            ChatMode::Whisper => "whisper",
        }
    }
}

/// Avatar appearance snapshot, copied from the identity record at join time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    #[serde(default)]
    pub figure: String,
    #[serde(default)]
    pub color: String,
}

/// One room member as reported in a `room_joined` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: String,
    pub name: String,
    pub position: Position,
    pub direction: Direction,
    pub appearance: Appearance,
}

/// One piece of transient in-room furniture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FurnitureSnapshot {
    pub id: u64,
    pub kind: String,
    pub position: Position,
    pub rotation: u8,
}

#[cfg(test)]
mod tests {
    use super::{ChatMode, Direction, Position};

    #[test]
    fn direction_from_step_covers_the_compass() {
        let o = Position::new(5, 5);
        assert_eq!(
            Direction::from_step(o, Position::new(5, 4)),
            Some(Direction::North)
        );
        assert_eq!(
            Direction::from_step(o, Position::new(9, 1)),
            Some(Direction::NorthEast)
        );
        assert_eq!(
            Direction::from_step(o, Position::new(8, 5)),
            Some(Direction::East)
        );
        assert_eq!(
            Direction::from_step(o, Position::new(2, 8)),
            Some(Direction::SouthWest)
        );
        assert_eq!(Direction::from_step(o, o), None);
    }

    #[test]
    fn chat_mode_defaults_to_normal() {
        assert_eq!(ChatMode::default(), ChatMode::Normal);
        let m: ChatMode = serde_json::from_str("\"shout\"").unwrap();
        assert_eq!(m, ChatMode::Shout);
    }
}
