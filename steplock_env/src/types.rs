//! Common types shared by the core and its hosts.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A human participant, identified by the host's player index.
///
/// Player indices start at 1; `ViewerId(0)` is never a valid viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(pub u32);

impl ViewerId {
    /// Returns true if this is a usable player index.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer#{}", self.0)
    }
}

/// Unique identifier of a conversational/controllable agent.
///
/// Ordered so it can key `BTreeMap`s: every collection the core iterates
/// during a step must iterate identically on every replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Id of the placeholder agent the registry falls back to.
    pub const DEFAULT: &'static str = "default";

    /// Parses an agent id, trimming whitespace and rejecting empty ids.
    pub fn parse(raw: &str) -> Result<Self, EnvError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnvError::EmptyIdentifier("agent"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The placeholder `"default"` agent id.
    pub fn default_agent() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns false for a blank id. Ids built through `parse` or
    /// deserialization are always valid.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = EnvError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl FromStr for AgentId {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Eight-way walking direction, matching the host's compass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[serde(alias = "n")]
    North,
    #[serde(alias = "ne")]
    NorthEast,
    #[serde(alias = "e")]
    East,
    #[serde(alias = "se")]
    SouthEast,
    #[serde(alias = "s")]
    South,
    #[serde(alias = "sw")]
    SouthWest,
    #[serde(alias = "w")]
    West,
    #[serde(alias = "nw")]
    NorthWest,
}

impl Direction {
    /// All directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Returns the short compass name (`n`, `ne`, ...).
    pub fn short_name(&self) -> &'static str {
        match self {
            Direction::North => "n",
            Direction::NorthEast => "ne",
            Direction::East => "e",
            Direction::SouthEast => "se",
            Direction::South => "s",
            Direction::SouthWest => "sw",
            Direction::West => "w",
            Direction::NorthWest => "nw",
        }
    }

    /// Unit step in screen coordinates (north is negative y).
    pub fn unit_vector(&self) -> (f64, f64) {
        const D: f64 = std::f64::consts::FRAC_1_SQRT_2;
        match self {
            Direction::North => (0.0, -1.0),
            Direction::NorthEast => (D, -D),
            Direction::East => (1.0, 0.0),
            Direction::SouthEast => (D, D),
            Direction::South => (0.0, 1.0),
            Direction::SouthWest => (-D, D),
            Direction::West => (-1.0, 0.0),
            Direction::NorthWest => (-D, -D),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Direction {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "n" | "north" => Ok(Direction::North),
            "ne" | "northeast" => Ok(Direction::NorthEast),
            "e" | "east" => Ok(Direction::East),
            "se" | "southeast" => Ok(Direction::SouthEast),
            "s" | "south" => Ok(Direction::South),
            "sw" | "southwest" => Ok(Direction::SouthWest),
            "w" | "west" => Ok(Direction::West),
            "nw" | "northwest" => Ok(Direction::NorthWest),
            _ => Err(EnvError::InvalidDirection(s.to_string())),
        }
    }
}

/// Position of an actor on the host's map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "player" => Ok(Role::User),
            "agent" | "assistant" => Ok(Role::Agent),
            "system" => Ok(Role::System),
            _ => Err(EnvError::InvalidRole(s.to_string())),
        }
    }
}

/// Handle to an open presentation surface (chat window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(pub u32);

/// Identifier of an outbound chat request.
///
/// Derived from the step and the request's ordinal within that step, never
/// from a random source, so every replica assigns the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Creates a deterministic request id from a step number and ordinal.
    pub fn derive(step: u64, ordinal: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&step.to_be_bytes());
        bytes[8..16].copy_from_slice(&ordinal.wrapping_mul(0x517cc1b727220a95).to_be_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
