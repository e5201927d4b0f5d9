//! Command frames understood by the stage firmware.
//!
//! ## Frame Format
//!
//! Every request is one ASCII line made of a single-character opcode,
//! optionally followed by a bracketed, comma-separated list of integers:
//!
//! ```text
//! +--------+-------------------------+
//! | Opcode |        Arguments        |
//! +--------+-------------------------+
//! | 1 char | "[" int ("," int)* "]"  |
//! +--------+-------------------------+
//! ```
//!
//! | Command        | Frame         |
//! |----------------|---------------|
//! | Enable/disable | `E[0]`/`E[1]` |
//! | Absolute move  | `m[t,x,y,z]`  |
//! | Relative move  | `M[t,x,y,z]`  |
//! | Pause          | `p`           |
//! | Continue       | `c`           |
//! | Idle/ping      | `I`           |
//! | Homing order   | `h[a,b,c]`    |
//! | Run homing     | `H`           |
//! | Identify       | `?`           |

use crate::error::{Error, Result};
use std::fmt;

/// Stage axis, numbered the way the firmware indexes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Axis {
    /// X axis (index 0).
    X,
    /// Y axis (index 1).
    Y,
    /// Z axis (index 2).
    Z,
}

impl Axis {
    /// All axes in firmware index order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Firmware index of this axis.
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    /// Get the axis for a firmware index.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }

    /// Get the axis from a name such as `"x"` or `"Z"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "z" => Some(Self::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
            Self::Z => write!(f, "Z"),
        }
    }
}

/// Priority order in which the firmware homes the axes.
///
/// Each of the three slots holds an axis or `None` to skip the slot.
/// Skipped slots are encoded as `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomingOrder {
    slots: [Option<Axis>; 3],
}

impl HomingOrder {
    /// Create a homing order from three slots.
    pub fn new(first: Option<Axis>, second: Option<Axis>, third: Option<Axis>) -> Self {
        Self {
            slots: [first, second, third],
        }
    }

    /// Create a homing order from firmware indices (`-1` skips a slot).
    pub fn from_indices(first: i64, second: i64, third: i64) -> Result<Self> {
        let slot = |value: i64| -> Result<Option<Axis>> {
            if value == -1 {
                return Ok(None);
            }
            Axis::from_index(value).map(Some).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "homing slot must be -1, 0, 1 or 2 (got {value})"
                ))
            })
        };

        Ok(Self::new(slot(first)?, slot(second)?, slot(third)?))
    }

    /// Slots in priority order.
    pub fn slots(&self) -> [Option<Axis>; 3] {
        self.slots
    }

    /// Wire values of the three slots.
    #[allow(clippy::cast_possible_wrap)]
    pub fn indices(&self) -> [i64; 3] {
        self.slots
            .map(|slot| slot.map_or(-1, |axis| axis.index() as i64))
    }
}

impl Default for HomingOrder {
    /// Home the Z axis only.
    fn default() -> Self {
        Self::new(Some(Axis::Z), None, None)
    }
}

/// Request sent to the stage firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enable (`true`) or disable (`false`) the motor drivers.
    Enable(bool),
    /// Move to an absolute position, in motor steps, over `t` time units.
    MoveTo {
        /// Duration.
        t: i64,
        /// Target X.
        x: i64,
        /// Target Y.
        y: i64,
        /// Target Z.
        z: i64,
    },
    /// Move by a relative displacement, in motor steps, over `dt` time units.
    Move {
        /// Duration.
        dt: i64,
        /// X displacement.
        dx: i64,
        /// Y displacement.
        dy: i64,
        /// Z displacement.
        dz: i64,
    },
    /// Pause after the ongoing move.
    Pause,
    /// Continue after a pause.
    Continue,
    /// Idle query, used as a ping.
    Idle,
    /// Configure the homing order.
    SetHoming(HomingOrder),
    /// Run homing in the configured order.
    Homing,
    /// Ask the device to identify itself.
    Identify,
}

impl Command {
    /// Opcode character that starts the frame.
    pub fn opcode(&self) -> char {
        match self {
            Self::Enable(_) => 'E',
            Self::MoveTo { .. } => 'm',
            Self::Move { .. } => 'M',
            Self::Pause => 'p',
            Self::Continue => 'c',
            Self::Idle => 'I',
            Self::SetHoming(_) => 'h',
            Self::Homing => 'H',
            Self::Identify => '?',
        }
    }

    /// Build the frame text (without line terminator).
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match *self {
            Self::Enable(enable) => write!(f, "{op}[{}]", u8::from(enable)),
            Self::MoveTo { t, x, y, z } => write!(f, "{op}[{t},{x},{y},{z}]"),
            Self::Move { dt, dx, dy, dz } => write!(f, "{op}[{dt},{dx},{dy},{dz}]"),
            Self::SetHoming(order) => {
                let [a, b, c] = order.indices();
                write!(f, "{op}[{a},{b},{c}]")
            },
            Self::Pause | Self::Continue | Self::Idle | Self::Homing | Self::Identify => {
                write!(f, "{op}")
            },
        }
    }
}
