//! Serial link abstraction.
//!
//! The stage controller and the discovery scan only talk to the hardware
//! through the [`Port`] trait, so both can run against the native
//! `serialport` backend or an in-memory port in tests.
//!
//! ```text
//! +------------------+     +------------------+
//! | Stage Controller |     |  Port Discovery  |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+------------------------+---------+
//! |                Port Trait                 |
//! +--------+------------------------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! | NativePort       |     | MockPort         |
//! |   (serialport)   |     |   (tests)        |
//! +------------------+     +------------------+
//! ```
//!
//! Frames are ASCII lines terminated by `\n`.

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use log::trace;

/// Line terminator appended to every frame.
pub const LINE_TERMINATOR: &str = "\n";

/// Longest reply line accepted before giving up on a runaway stream.
pub const MAX_LINE_LEN: usize = 512;

/// Default baud rate of the stage firmware.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default read timeout for regular commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial link configuration (8 data bits, no parity, 1 stop bit).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM6").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout for regular commands.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same settings for another port.
    #[must_use]
    pub fn for_port(&self, port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..self.clone()
        }
    }
}

/// Byte transport to the stage firmware.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Discard pending input and output.
    ///
    /// Called before every command so a stale line is never taken for its
    /// reply.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release the device.
    ///
    /// Closing an already closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write one frame followed by the line terminator.
    fn write_line(&mut self, frame: &str) -> Result<()> {
        trace!("[{}] >> {frame}", self.name());
        let mut data = Vec::with_capacity(frame.len() + LINE_TERMINATOR.len());
        data.extend_from_slice(frame.as_bytes());
        data.extend_from_slice(LINE_TERMINATOR.as_bytes());
        self.write_all(&data)?;
        self.flush()?;
        Ok(())
    }

    /// Read one line, without its terminator.
    ///
    /// A read timeout maps to [`Error::Timeout`]; a stream that ends before
    /// any byte arrives maps to [`Error::NoReply`]. Bytes of a line cut short
    /// by a timeout are dropped, and the rest of that line stays in the input
    /// buffer until the next [`clear_buffers`](Self::clear_buffers).
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.read(&mut byte) {
                Ok(0) if line.is_empty() => return Err(Error::NoReply),
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if line.len() > MAX_LINE_LEN {
                        return Err(Error::Protocol(format!(
                            "reply longer than {MAX_LINE_LEN} bytes"
                        )));
                    }
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "no reply from {} within {} ms",
                        self.name(),
                        self.timeout().as_millis()
                    )));
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let text = String::from_utf8_lossy(&line).into_owned();
        trace!("[{}] << {}", self.name(), text.trim_end());
        Ok(text)
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;
