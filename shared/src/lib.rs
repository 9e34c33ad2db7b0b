use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub mod profile;

pub use profile::{Position, Progress, Settings, Trainer, TrainerProfile, VolumeSettings};

pub const DEFAULT_GRID_WIDTH: usize = 30;
pub const DEFAULT_GRID_HEIGHT: usize = 30;
pub const DEFAULT_AUTOSAVE_SECS: u64 = 45;
pub const SPAWN_SEARCH_ATTEMPTS: u32 = 500;
pub const DEFAULT_SPAWN: (i32, i32) = (0, 0);
pub const DEFAULT_MAP_ID: &str = "overworld";
pub const DEFAULT_SPRITE: &str = "male_1.png";
pub const DEFAULT_TRAINER_NAME: &str = "William";

/// Starter species a new trainer may pick during onboarding. Selections are
/// matched exactly against these ids, without case folding.
pub const STARTER_SPECIES: [&str; 3] = ["bulbasaur", "charmander", "squirtle"];

/// One cell of the world grid. Serialized as the single-character codes the
/// clients render from (`L`, `W`, `P`, `G`, `B`, `O`, `S`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tile {
    #[serde(rename = "L")]
    Land,
    #[serde(rename = "W")]
    Water,
    #[serde(rename = "P")]
    Path,
    #[serde(rename = "G")]
    TallGrass,
    #[serde(rename = "B")]
    Building,
    #[serde(rename = "O")]
    Obstacle,
    #[serde(rename = "S")]
    Spawn,
}

impl Tile {
    pub fn code(self) -> char {
        match self {
            Tile::Land => 'L',
            Tile::Water => 'W',
            Tile::Path => 'P',
            Tile::TallGrass => 'G',
            Tile::Building => 'B',
            Tile::Obstacle => 'O',
            Tile::Spawn => 'S',
        }
    }

    /// Whether a player may occupy this tile.
    pub fn is_walkable(self) -> bool {
        matches!(self, Tile::Land | Tile::Path | Tile::Spawn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Parses the wire form of a movement command. Unrecognized strings map
    /// to `None`; callers treat that as a zero delta rather than an error.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// The subset of session fields safe to share with every connection.
/// The embedded profile document is never part of this view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicPlayer {
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub sprite: String,
    pub map_id: String,
    pub trainer_id: String,
}

/// Inbound events from clients. Every payload field is optional with a
/// documented default so that sparse client payloads stay decodable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Connect {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        sprite: Option<String>,
    },
    Move {
        #[serde(default)]
        direction: Option<String>,
    },
    ChooseStarter {
        #[serde(default)]
        species: Option<String>,
    },
    MapTransition {
        #[serde(default)]
        map_id: Option<String>,
    },
    InventoryChange {
        #[serde(default)]
        inventory: Option<Value>,
    },
    BattleEnd {
        #[serde(default)]
        profile_patch: Option<Value>,
    },
    Disconnect,
}

/// Outbound events emitted by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full world snapshot, sent to a newly connected client only.
    State {
        grid: Vec<Vec<Tile>>,
        player: Option<PublicPlayer>,
        players: HashMap<u32, PublicPlayer>,
        profile: TrainerProfile,
    },
    PlayersUpdate {
        players: HashMap<u32, PublicPlayer>,
    },
    /// Onboarding prompt, sent when the connecting trainer has no starter yet.
    ChooseStarter {
        options: Vec<String>,
    },
    StarterConfirmed {
        species: String,
    },
    StarterError {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Deep-merges `patch` into `target`. When both sides hold a JSON object at
/// the same key the merge recurses; any other pairing (scalars and arrays
/// included) replaces the target value outright.
pub fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                merge_value(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
