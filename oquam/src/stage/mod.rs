//! Stage model: gear ratios, logical position and the controller.
//!
//! Positions are tracked in stage steps. The firmware consumes motor steps,
//! which are stage steps multiplied by the gear ratio of the axis.

pub mod controller;

pub use controller::StageController;

use crate::error::{Error, Result};
use crate::protocol::Axis;
use std::fmt;
use std::str::FromStr;

/// Motor steps per stage step, one factor per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "[u32; 3]", into = "[u32; 3]")
)]
pub struct GearRatio {
    x: u32,
    y: u32,
    z: u32,
}

impl GearRatio {
    /// Create a gear ratio. Every factor must be positive.
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(Error::InvalidArgument(format!(
                "gear ratios must be positive (got {x},{y},{z})"
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Factor for one axis.
    pub fn get(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

impl Default for GearRatio {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl TryFrom<[u32; 3]> for GearRatio {
    type Error = Error;

    fn try_from([x, y, z]: [u32; 3]) -> Result<Self> {
        Self::new(x, y, z)
    }
}

impl From<GearRatio> for [u32; 3] {
    fn from(gears: GearRatio) -> Self {
        [gears.x, gears.y, gears.z]
    }
}

impl FromStr for GearRatio {
    type Err = Error;

    /// Parse `"gx,gy,gz"` (spaces also accepted as separators).
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() != 3 {
            return Err(Error::InvalidArgument(format!(
                "expected three gear ratios 'gx,gy,gz', got '{s}'"
            )));
        }

        let mut values = [0u32; 3];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part.parse().map_err(|_| {
                Error::InvalidArgument(format!("invalid gear ratio '{part}'"))
            })?;
        }

        Self::try_from(values)
    }
}

impl fmt::Display for GearRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Logical stage position, in stage steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StagePosition {
    /// X position.
    pub x: i64,
    /// Y position.
    pub y: i64,
    /// Z position.
    pub z: i64,
}

impl StagePosition {
    /// Position along one axis.
    pub fn get(&self, axis: Axis) -> i64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub(crate) fn get_mut(&mut self, axis: Axis) -> &mut i64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x = {}, y = {}, z = {}", self.x, self.y, self.z)
    }
}

/// When a relative axis move is added to the logical position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PositionPolicy {
    /// As soon as the move frame has been transmitted, whatever the reply.
    ///
    /// A device error on a move still leaves the position updated.
    #[default]
    OnSend,
    /// Only once the firmware acknowledges the move with status 0.
    OnConfirmed,
}

impl PositionPolicy {
    /// Whether a transmitted move is recorded, given whether it was confirmed.
    pub fn records(self, confirmed: bool) -> bool {
        match self {
            Self::OnSend => true,
            Self::OnConfirmed => confirmed,
        }
    }
}
