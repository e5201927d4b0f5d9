//! Serial device enumeration and classification.
//!
//! Candidates are enumerated fresh on every discovery attempt. Each carries
//! the OS port name plus the description and hardware-id strings used by
//! the discovery heuristics.

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB bridge/board kinds commonly used with the stage controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Arduino board with native USB (Uno, Mega, Leonardo, ...).
    Arduino,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232 family USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB vendor IDs.
const KNOWN_USB_VENDORS: &[(u16, DeviceKind)] = &[
    (0x2341, DeviceKind::Arduino),
    (0x2A03, DeviceKind::Arduino),
    (0x1A86, DeviceKind::Ch340),
    (0x10C4, DeviceKind::Cp210x),
    (0x0403, DeviceKind::Ftdi),
    (0x067B, DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a USB vendor ID.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        KNOWN_USB_VENDORS
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Serial endpoint considered during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateDevice {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM6").
    pub name: String,
    /// Human-readable description (if available).
    pub description: Option<String>,
    /// Hardware identifier, e.g. `USB VID:PID=2341:0043 SER=...`.
    pub hwid: Option<String>,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl CandidateDevice {
    /// Candidate with only a port name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            hwid: None,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the hardware identifier.
    #[must_use]
    pub fn with_hwid(mut self, hwid: impl Into<String>) -> Self {
        self.hwid = Some(hwid.into());
        self
    }

    /// Description, or an empty string.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Whether the description or hardware id contains any keyword
    /// (case-insensitive).
    pub fn matches_any<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        let description = self.description_text().to_lowercase();
        let hwid = self.hwid.as_deref().unwrap_or_default().to_lowercase();

        keywords.iter().any(|k| {
            let k = k.as_ref().to_lowercase();
            !k.is_empty() && (description.contains(&k) || hwid.contains(&k))
        })
    }

    /// Whether the description alone contains any marker (case-insensitive).
    pub fn description_matches_any<S: AsRef<str>>(&self, markers: &[S]) -> bool {
        let description = self.description_text().to_lowercase();
        markers.iter().any(|m| {
            let m = m.as_ref().to_lowercase();
            !m.is_empty() && description.contains(&m)
        })
    }
}

/// Build the hardware id string for a USB port.
pub fn usb_hwid(vid: u16, pid: u16, serial: Option<&str>) -> String {
    match serial {
        Some(serial) => format!("USB VID:PID={vid:04X}:{pid:04X} SER={serial}"),
        None => format!("USB VID:PID={vid:04X}:{pid:04X}"),
    }
}

/// Enumerate serial devices visible to the operating system.
///
/// Enumeration failures are logged and reported as an empty list.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<CandidateDevice> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut candidate = CandidateDevice::new(port_info.port_name);

            match port_info.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    candidate.hwid = Some(usb_hwid(usb.vid, usb.pid, usb.serial_number.as_deref()));
                    candidate.description = usb
                        .product
                        .clone()
                        .or_else(|| usb.manufacturer.clone());
                    candidate.device = DeviceKind::from_vid(usb.vid);
                    candidate.vid = Some(usb.vid);
                    candidate.pid = Some(usb.pid);
                    candidate.manufacturer = usb.manufacturer;
                    candidate.product = usb.product;
                    candidate.serial = usb.serial_number;
                },
                serialport::SerialPortType::BluetoothPort => {
                    candidate.description = Some("Bluetooth serial port".to_string());
                },
                serialport::SerialPortType::PciPort => {
                    candidate.description = Some("PCI serial port".to_string());
                },
                serialport::SerialPortType::Unknown => {},
            }

            trace!(
                "Found port: {} ({}) [{}]",
                candidate.name,
                candidate.description_text(),
                candidate.device.name()
            );
            candidate
        })
        .collect()
}

/// Enumerate serial devices (no native backend - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<CandidateDevice> {
    Vec::new()
}

/// Format a list of candidates for display.
pub fn format_port_list(ports: &[CandidateDevice]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let description = port
                .description
                .as_ref()
                .map(|d| format!(" - {d}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, description)
        })
        .collect()
}
