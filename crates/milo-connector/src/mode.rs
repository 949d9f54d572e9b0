use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::ConnectorError;

fn mode_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^(<*)-+(>*)$").unwrap())
}

/// Which way changes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// ds1 to ds2, the right arrows (`->`).
    Forward,
    /// ds2 to ds1, the left arrows (`<-`).
    Backward,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Backward];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn source(self) -> Endpoint {
        match self {
            Direction::Forward => Endpoint::Ds1,
            Direction::Backward => Endpoint::Ds2,
        }
    }

    pub fn target(self) -> Endpoint {
        self.reverse().source()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Forward => "->",
            Direction::Backward => "<-",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ds1,
    Ds2,
}

impl Endpoint {
    pub(crate) fn index(self) -> usize {
        match self {
            Endpoint::Ds1 => 0,
            Endpoint::Ds2 => 1,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endpoint::Ds1 => "ds1",
            Endpoint::Ds2 => "ds2",
        })
    }
}

/// Direction and depth of a connector, written as arrows: `<<->>`.
///
/// Left arrows give the depth of ds2 to ds1 propagation, right arrows the
/// depth of ds1 to ds2 propagation.
///
/// # Example
///
/// ```
/// use milo_connector::{Direction, Mode};
///
/// let mode = Mode::parse("<<->>").unwrap();
/// assert_eq!(mode.depth(Direction::Forward), 2);
/// assert_eq!(mode.depth(Direction::Backward), 2);
/// assert!(Mode::parse("<->>").is_err());
/// assert!(Mode::parse("--").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    depth1: usize,
    depth2: usize,
}

impl Mode {
    pub fn parse(mode: &str) -> Result<Self, ConnectorError> {
        let caps = mode_regex()
            .captures(mode)
            .ok_or_else(|| ConnectorError::InvalidMode(mode.to_string()))?;
        let depth1 = caps.get(1).map_or(0, |m| m.len());
        let depth2 = caps.get(2).map_or(0, |m| m.len());
        match (depth1, depth2) {
            (0, 0) => Err(ConnectorError::NoDirection(mode.to_string())),
            (a, b) if a > 0 && b > 0 && a != b => Err(ConnectorError::UnequalDepth(mode.to_string())),
            _ => Ok(Self { depth1, depth2 }),
        }
    }

    /// ds2 to ds1 depth.
    pub fn depth1(&self) -> usize {
        self.depth1
    }

    /// ds1 to ds2 depth.
    pub fn depth2(&self) -> usize {
        self.depth2
    }

    pub fn depth(&self, direction: Direction) -> usize {
        match direction {
            Direction::Forward => self.depth2,
            Direction::Backward => self.depth1,
        }
    }

    pub fn is_enabled(&self, direction: Direction) -> bool {
        self.depth(direction) > 0
    }
}

impl FromStr for Mode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", "<".repeat(self.depth1), ">".repeat(self.depth2))
    }
}
