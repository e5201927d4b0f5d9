//! Host-side entry points over the native serial backend.

use crate::device::CandidateDevice;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<CandidateDevice> {
    crate::device::detect_ports()
}

/// Probe the serial ports of this machine and connect to the first stage
/// controller that identifies itself. Blocks the calling thread.
#[cfg(feature = "native")]
pub fn discover_stage(
    gears: crate::stage::GearRatio,
    config: &crate::discovery::DiscoveryConfig,
) -> crate::Result<crate::discovery::Discovered<crate::port::NativePort>> {
    crate::discovery::discover_with(
        discover_ports(),
        gears,
        config,
        |candidate| crate::port::NativePort::open(&config.serial.for_port(&candidate.name)),
        crate::is_interrupted_requested,
    )
}

/// Open a known port without the identification handshake.
#[cfg(feature = "native")]
pub fn connect_stage(
    serial: &crate::port::SerialConfig,
    gears: crate::stage::GearRatio,
) -> crate::Result<crate::stage::StageController<crate::port::NativePort>> {
    let port = crate::port::NativePort::open(serial)?;
    Ok(crate::stage::StageController::new(port, gears))
}
