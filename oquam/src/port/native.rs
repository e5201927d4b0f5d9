//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::debug,
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Serial port backed by the operating system.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration (8N1, no flow control).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config.port_name.is_empty() {
            return Err(Error::InvalidArgument("empty port name".into()));
        }

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        debug!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
        })
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::LinkClosed)?;
        port.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle releases the device
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(Write::flush)
    }
}
