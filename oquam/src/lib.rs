//! # oquam
//!
//! A library for driving Oquam three-axis motorized stages over a serial
//! link.
//!
//! This crate provides:
//!
//! - The ASCII command codec (`E`, `m`, `M`, `p`, `c`, `I`, `h`, `H`, `?`)
//! - A stage controller tracking the logical position through gear ratios
//! - Port discovery with an identification handshake, blocking or on a
//!   background worker
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for configuration and data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use oquam::{DiscoveryConfig, GearRatio, Scanner};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gears = GearRatio::new(1, 100, 1)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let scan = Scanner::new().start_native(gears, DiscoveryConfig::default())?;
//!         let mut found = scan.wait()?;
//!         println!("Found {} on {}", found.identification.device(), found.candidate.name);
//!
//!         let stage = &mut found.controller;
//!         stage.enable(true)?;
//!         stage.move_axis_x(10, None)?;
//!         stage.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod discovery;
pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod stage;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by discovery scans.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use {
    host::{connect_stage, discover_stage},
    port::NativePort,
};
pub use {
    device::{CandidateDevice, DeviceKind, detect_ports, format_port_list},
    discovery::{Discovered, DiscoveryConfig, ScanHandle, Scanner, discover_with, order_candidates},
    error::{Error, Result},
    host::discover_ports,
    port::{Port, SerialConfig},
    protocol::{Axis, Command, HomingOrder, Identification, Reply, ReplyValue},
    stage::{GearRatio, PositionPolicy, StageController, StagePosition},
};
