//! In-memory port for unit tests.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next read returns.
#[derive(Debug, Clone)]
enum Scripted {
    Line(String),
    Timeout,
}

/// Shared record of everything done to a [`MockPort`].
#[derive(Debug, Default)]
struct Record {
    frames: Vec<String>,
    timeouts: Vec<Duration>,
    clears: usize,
    closes: usize,
}

/// Handle for inspecting a [`MockPort`] after it has been moved.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockLog(Arc<Mutex<Record>>);

impl MockLog {
    /// Frames written so far, without terminators.
    pub(crate) fn frames(&self) -> Vec<String> {
        self.0.lock().map(|r| r.frames.clone()).unwrap_or_default()
    }

    /// Last frame written.
    pub(crate) fn last_frame(&self) -> Option<String> {
        self.frames().last().cloned()
    }

    /// Every timeout value set through [`Port::set_timeout`].
    pub(crate) fn timeouts(&self) -> Vec<Duration> {
        self.0.lock().map(|r| r.timeouts.clone()).unwrap_or_default()
    }

    /// Number of times the buffers were cleared.
    pub(crate) fn clears(&self) -> usize {
        self.0.lock().map(|r| r.clears).unwrap_or_default()
    }

    /// Number of times the port was actually released.
    pub(crate) fn closes(&self) -> usize {
        self.0.lock().map(|r| r.closes).unwrap_or_default()
    }
}

/// Scripted serial port.
pub(crate) struct MockPort {
    name: String,
    timeout: Duration,
    open: bool,
    fail_writes: bool,
    script: VecDeque<Scripted>,
    pending: VecDeque<u8>,
    partial: Vec<u8>,
    log: MockLog,
}

impl MockPort {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_secs(5),
            open: true,
            fail_writes: false,
            script: VecDeque::new(),
            pending: VecDeque::new(),
            partial: Vec::new(),
            log: MockLog::default(),
        }
    }

    /// Queue a reply line (terminator added).
    pub(crate) fn with_reply(mut self, line: &str) -> Self {
        self.script.push_back(Scripted::Line(line.to_string()));
        self
    }

    /// Queue a read timeout.
    pub(crate) fn with_timeout_reply(mut self) -> Self {
        self.script.push_back(Scripted::Timeout);
        self
    }

    /// Input that has already arrived before the next command, as raw text.
    pub(crate) fn with_stale_input(mut self, text: &str) -> Self {
        self.pending.extend(text.bytes());
        self
    }

    /// Make every write fail.
    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn log(&self) -> MockLog {
        self.log.clone()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }

        if self.pending.is_empty() {
            match self.script.pop_front() {
                Some(Scripted::Line(line)) => {
                    self.pending.extend(line.bytes());
                    self.pending.push_back(b'\n');
                },
                Some(Scripted::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
                },
                None => return Ok(0),
            }
        }

        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                },
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }

        for &b in buf {
            if b == b'\n' {
                let frame = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                if let Ok(mut record) = self.log.0.lock() {
                    record.frames.push(frame);
                }
            } else {
                self.partial.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        if let Ok(mut record) = self.log.0.lock() {
            record.timeouts.push(timeout);
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.pending.clear();
        if let Ok(mut record) = self.log.0.lock() {
            record.clears += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            if let Ok(mut record) = self.log.0.lock() {
                record.closes += 1;
            }
        }
        Ok(())
    }
}
