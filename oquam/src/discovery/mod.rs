//! Port discovery and identification handshake.
//!
//! Stage controllers do not keep a stable device name across operating
//! systems or reconnections, so the controller is found by probing: every
//! candidate port is opened in turn, sent the identify request, and kept
//! only if it answers with the expected identification frame.
//!
//! ## Candidate order
//!
//! 1. Candidates whose description or hardware id contains a known
//!    USB-serial keyword, then all others.
//! 2. Within each group, the preferred (previously selected) port first;
//!    everything else keeps its enumeration order.
//!
//! Candidates whose description contains a skip marker (Bluetooth virtual
//! ports, which tend to block on open) are never opened.
//!
//! Exactly one port is open at a time: a candidate that fails the handshake
//! is closed before the next one is tried.

pub mod scanner;

pub use scanner::{ScanHandle, Scanner};

use crate::device::CandidateDevice;
use crate::error::{Error, Result};
use crate::port::{Port, SerialConfig};
use crate::protocol::Identification;
use crate::stage::{GearRatio, StageController};
use log::{debug, info, warn};
use std::time::Duration;

/// Read timeout applied to the identify exchange only.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Description/hardware-id keywords of likely controllers.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "arduino",
    "wchusbserial",
    "usb-serial",
    "usb serial",
    "ch340",
    "ftdi",
];

/// Description markers of ports that are never probed.
pub const DEFAULT_SKIP_MARKERS: &[&str] = &["bluetooth"];

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryConfig {
    /// Timeout of the identify read.
    pub handshake_timeout: Duration,
    /// Keywords marking likely controllers (case-insensitive).
    pub keywords: Vec<String>,
    /// Description markers of ports to skip (case-insensitive).
    pub skip_markers: Vec<String>,
    /// Port name to try first, typically the last confirmed one.
    pub preferred: Option<String>,
    /// Settings used to open each candidate.
    pub serial: SerialConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keywords: DEFAULT_KEYWORDS.iter().map(ToString::to_string).collect(),
            skip_markers: DEFAULT_SKIP_MARKERS.iter().map(ToString::to_string).collect(),
            preferred: None,
            serial: SerialConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the preferred port.
    #[must_use]
    pub fn with_preferred(mut self, preferred: Option<String>) -> Self {
        self.preferred = preferred.filter(|p| !p.is_empty());
        self
    }

    /// Replace the likely-controller keywords.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the skip markers.
    #[must_use]
    pub fn with_skip_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the serial settings used to open candidates.
    #[must_use]
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    fn is_preferred(&self, candidate: &CandidateDevice) -> bool {
        self.preferred.as_deref() == Some(candidate.name.as_str())
    }
}

/// A confirmed stage controller.
pub struct Discovered<P: Port> {
    /// Connected controller, exclusively owned by the caller.
    pub controller: StageController<P>,
    /// Port the controller was found on.
    pub candidate: CandidateDevice,
    /// Identification reply.
    pub identification: Identification,
    /// Number of candidates opened, the confirmed one included.
    pub tried: usize,
}

/// Order candidates for probing: likely controllers first, preferred port
/// first within each group, enumeration order otherwise.
pub fn order_candidates(
    candidates: Vec<CandidateDevice>,
    config: &DiscoveryConfig,
) -> Vec<CandidateDevice> {
    let (mut likely, mut others): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.matches_any(&config.keywords));

    // Stable sort keeps enumeration order among equals
    likely.sort_by_key(|c| !config.is_preferred(c));
    others.sort_by_key(|c| !config.is_preferred(c));

    debug!(
        "{} likely candidate(s), {} other(s)",
        likely.len(),
        others.len()
    );

    likely.extend(others);
    likely
}

/// Probe `candidates` and return the first one that identifies itself.
///
/// `open` opens a port for a candidate; `cancelled` is polled before each
/// candidate and after each successful handshake. Per-candidate failures
/// are logged and only kept as the last error.
pub fn discover_with<P, F, C>(
    candidates: Vec<CandidateDevice>,
    gears: GearRatio,
    config: &DiscoveryConfig,
    mut open: F,
    cancelled: C,
) -> Result<Discovered<P>>
where
    P: Port,
    F: FnMut(&CandidateDevice) -> Result<P>,
    C: Fn() -> bool,
{
    if candidates.is_empty() {
        info!("No serial ports found.");
        return Err(Error::NoSerialDevices);
    }

    info!("Starting port scan...");

    let mut tried = 0;
    let mut last_error = None;

    for candidate in order_candidates(candidates, config) {
        if cancelled() {
            info!("Port scan cancelled.");
            return Err(Error::Cancelled);
        }

        info!(
            "Trying port {} ({})...",
            candidate.name,
            candidate.description_text()
        );

        if candidate.description_matches_any(&config.skip_markers) {
            info!("Skipping {}: blocked device type.", candidate.name);
            continue;
        }

        tried += 1;

        let port = match open(&candidate) {
            Ok(port) => port,
            Err(e) => {
                warn!("Failed to open {}: {e}", candidate.name);
                last_error = Some(e);
                continue;
            },
        };

        let mut controller = StageController::new(port, gears);

        match controller.identify(config.handshake_timeout) {
            Ok(identification) => {
                if cancelled() {
                    // Dropping the controller releases the link
                    info!("Port scan cancelled.");
                    return Err(Error::Cancelled);
                }

                info!(
                    "Successfully connected to {} on {}.",
                    identification.device(),
                    candidate.name
                );
                return Ok(Discovered {
                    controller,
                    candidate,
                    identification,
                    tried,
                });
            },
            Err(e) => {
                warn!("Handshake failed on {}: {e}", candidate.name);
                if let Err(close_err) = controller.close() {
                    debug!("Error closing {}: {close_err}", candidate.name);
                }
                last_error = Some(e);
            },
        }
    }

    Err(Error::NoDeviceFound {
        tried,
        last_error: last_error.map(Box::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockLog, MockPort};
    use std::cell::RefCell;
    use std::collections::HashMap;

    const ID_REPLY: &str = "#?[0,\"Oquam-Stage-1\"]";

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn gears() -> GearRatio {
        GearRatio::new(1, 100, 1).unwrap()
    }

    fn names(candidates: &[CandidateDevice]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    /// Scripted ports by name; ports missing from the map fail to open.
    struct Bench {
        ports: RefCell<HashMap<String, MockPort>>,
        logs: HashMap<String, MockLog>,
        opened: RefCell<Vec<String>>,
    }

    impl Bench {
        fn new(ports: Vec<MockPort>) -> Self {
            let logs = ports.iter().map(|p| (p.name().to_string(), p.log())).collect();
            let ports = ports
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect();
            Self {
                ports: RefCell::new(ports),
                logs,
                opened: RefCell::new(Vec::new()),
            }
        }

        fn open(&self, candidate: &CandidateDevice) -> Result<MockPort> {
            self.opened.borrow_mut().push(candidate.name.clone());
            self.ports
                .borrow_mut()
                .remove(&candidate.name)
                .ok_or_else(|| Error::Timeout(format!("cannot open {}", candidate.name)))
        }

        fn closes(&self, name: &str) -> usize {
            self.logs.get(name).map_or(0, MockLog::closes)
        }
    }

    #[test]
    fn test_order_likely_then_preferred() {
        let a = CandidateDevice::new("A").with_description("Generic modem");
        let b = CandidateDevice::new("B").with_description("USB-SERIAL CH340");
        let c = CandidateDevice::new("C").with_description("Arduino Uno");
        let config = DiscoveryConfig::default().with_preferred(Some("C".into()));

        let ordered = order_candidates(vec![a, b, c], &config);
        assert_eq!(names(&ordered), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_order_is_stable_without_preference() {
        let ports = vec![
            CandidateDevice::new("/dev/ttyS0"),
            CandidateDevice::new("/dev/ttyUSB0").with_hwid("USB VID:PID=0403:6001 FTDI"),
            CandidateDevice::new("/dev/ttyS1"),
            CandidateDevice::new("/dev/ttyACM0").with_description("Arduino Mega"),
        ];
        let ordered = order_candidates(ports, &DiscoveryConfig::default());
        assert_eq!(
            names(&ordered),
            vec!["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyS0", "/dev/ttyS1"]
        );
    }

    #[test]
    fn test_preferred_non_likely_stays_after_likely() {
        let ports = vec![
            CandidateDevice::new("/dev/ttyS0"),
            CandidateDevice::new("/dev/ttyS1"),
            CandidateDevice::new("/dev/ttyACM0").with_description("Arduino"),
        ];
        let config = DiscoveryConfig::default().with_preferred(Some("/dev/ttyS1".into()));
        let ordered = order_candidates(ports, &config);
        assert_eq!(names(&ordered), vec!["/dev/ttyACM0", "/dev/ttyS1", "/dev/ttyS0"]);
    }

    #[test]
    fn test_no_candidates() {
        let bench = Bench::new(vec![]);
        let result = discover_with(
            vec![],
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || false,
        );
        assert!(matches!(result, Err(Error::NoSerialDevices)));
    }

    #[test]
    fn test_first_identifying_candidate_wins() {
        let bench = Bench::new(vec![
            MockPort::new("A").with_reply(ID_REPLY),
            MockPort::new("B").with_reply(ID_REPLY),
        ]);
        let candidates = vec![
            CandidateDevice::new("A").with_description("Arduino"),
            CandidateDevice::new("B").with_description("Arduino"),
        ];

        let found = discover_with(
            candidates,
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || false,
        )
        .unwrap();

        assert_eq!(found.candidate.name, "A");
        assert_eq!(found.identification.device(), "Oquam-Stage-1");
        assert_eq!(found.tried, 1);
        assert_eq!(found.controller.gears(), gears());
        assert!(!found.controller.is_closed());
        assert_eq!(*bench.opened.borrow(), vec!["A"]);
        assert_eq!(bench.closes("A"), 0);
    }

    #[test]
    fn test_fallback_order_after_failed_handshakes() {
        init_logger();
        let bench = Bench::new(vec![
            MockPort::new("A").with_reply(ID_REPLY),
            MockPort::new("B").with_reply("#![0,\"Other\"]"),
            MockPort::new("C").with_timeout_reply(),
        ]);
        let candidates = vec![
            CandidateDevice::new("A").with_description("Generic modem"),
            CandidateDevice::new("B").with_description("USB Serial Port"),
            CandidateDevice::new("C").with_description("Arduino Uno"),
        ];
        let config = DiscoveryConfig::default().with_preferred(Some("C".into()));

        let found = discover_with(candidates, gears(), &config, |c| bench.open(c), || false).unwrap();

        assert_eq!(*bench.opened.borrow(), vec!["C", "B", "A"]);
        assert_eq!(found.candidate.name, "A");
        assert_eq!(found.tried, 3);
        // Failed candidates were closed exactly once
        assert_eq!(bench.closes("C"), 1);
        assert_eq!(bench.closes("B"), 1);
        assert_eq!(bench.closes("A"), 0);
    }

    #[test]
    fn test_all_open_failures_report_last_error() {
        init_logger();
        let bench = Bench::new(vec![]);
        let candidates = vec![
            CandidateDevice::new("/dev/ttyS0"),
            CandidateDevice::new("/dev/ttyS1"),
            CandidateDevice::new("/dev/ttyS2"),
        ];

        let err = discover_with(
            candidates,
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || false,
        )
        .err()
        .unwrap();

        match err {
            Error::NoDeviceFound { tried, last_error } => {
                assert_eq!(tried, 3);
                let last = last_error.unwrap().to_string();
                assert!(last.contains("/dev/ttyS2"), "{last}");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_skipped_candidates_are_never_opened() {
        let bench = Bench::new(vec![
            MockPort::new("COM3").with_reply(ID_REPLY),
            MockPort::new("COM6").with_reply(ID_REPLY),
        ]);
        let candidates = vec![
            CandidateDevice::new("COM3").with_description("Standard Serial over Bluetooth link"),
            CandidateDevice::new("COM6").with_description("USB-SERIAL CH340"),
        ];
        let config = DiscoveryConfig::default().with_preferred(Some("COM3".into()));

        let found = discover_with(candidates, gears(), &config, |c| bench.open(c), || false).unwrap();

        assert_eq!(found.candidate.name, "COM6");
        assert_eq!(found.tried, 1);
        assert_eq!(*bench.opened.borrow(), vec!["COM6"]);
    }

    #[test]
    fn test_only_skipped_candidates() {
        let bench = Bench::new(vec![]);
        let candidates = vec![CandidateDevice::new("COM3").with_description("Bluetooth")];

        let err = discover_with(
            candidates,
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || false,
        )
        .err()
        .unwrap();

        assert!(matches!(
            err,
            Error::NoDeviceFound {
                tried: 0,
                last_error: None
            }
        ));
    }

    #[test]
    fn test_boot_banner_does_not_hide_controller() {
        let bench = Bench::new(vec![
            MockPort::new("A")
                .with_stale_input("Oquam firmware boot\n")
                .with_reply(ID_REPLY),
        ]);

        let found = discover_with(
            vec![CandidateDevice::new("A").with_description("Arduino")],
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || false,
        )
        .unwrap();

        assert_eq!(found.candidate.name, "A");
        assert_eq!(found.tried, 1);
        assert_eq!(bench.closes("A"), 0);
    }

    #[test]
    fn test_handshake_uses_configured_timeout() {
        let port = MockPort::new("A").with_reply(ID_REPLY);
        let log = port.log();
        let bench = Bench::new(vec![port]);
        let config = DiscoveryConfig::default().with_handshake_timeout(Duration::from_millis(250));

        let found = discover_with(
            vec![CandidateDevice::new("A")],
            gears(),
            &config,
            |c| bench.open(c),
            || false,
        )
        .unwrap();

        assert_eq!(log.frames(), vec!["?"]);
        assert_eq!(log.timeouts()[0], Duration::from_millis(250));
        // Regular timeout restored on the returned controller
        assert_eq!(log.timeouts()[1], Duration::from_secs(5));
        drop(found);
        assert_eq!(log.closes(), 1);
    }

    #[test]
    fn test_cancelled_before_first_candidate() {
        let bench = Bench::new(vec![MockPort::new("A").with_reply(ID_REPLY)]);
        let result = discover_with(
            vec![CandidateDevice::new("A")],
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || true,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(bench.opened.borrow().is_empty());
    }

    #[test]
    fn test_cancel_after_handshake_closes_link() {
        let port = MockPort::new("A").with_reply(ID_REPLY);
        let log = port.log();
        let bench = Bench::new(vec![port]);
        let polls = std::cell::Cell::new(0);

        let result = discover_with(
            vec![CandidateDevice::new("A")],
            gears(),
            &DiscoveryConfig::default(),
            |c| bench.open(c),
            || {
                polls.set(polls.get() + 1);
                polls.get() > 1
            },
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(log.closes(), 1);
    }

    #[test]
    fn test_custom_keywords() {
        let ports = vec![
            CandidateDevice::new("A").with_description("Arduino"),
            CandidateDevice::new("B").with_description("Oquam controller"),
        ];
        let config = DiscoveryConfig::default().with_keywords(["oquam"]);
        let ordered = order_candidates(ports, &config);
        assert_eq!(names(&ordered), vec!["B", "A"]);
    }
}
