//! Background port scan.
//!
//! A [`Scanner`] runs at most one scan at a time on a worker thread. The
//! caller keeps a [`ScanHandle`] to poll for the result, wait for it, or
//! cancel the scan. Cancellation is observed between candidates; the
//! in-flight handshake finishes (bounded by the handshake timeout) and its
//! link is closed.

use {
    crate::{
        device::CandidateDevice,
        discovery::{Discovered, DiscoveryConfig, discover_with},
        error::{Error, Result},
        port::Port,
        stage::GearRatio,
    },
    log::debug,
    std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
            mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Releases the scanner's busy flag when the worker ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight background scanner.
#[derive(Debug, Default, Clone)]
pub struct Scanner {
    busy: Arc<AtomicBool>,
}

impl Scanner {
    /// Create an idle scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a scan is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a scan on a worker thread.
    ///
    /// `enumerate` runs on the worker and lists the candidates; `open` opens
    /// one candidate. Fails with [`Error::ScanInProgress`] while another scan
    /// started from this scanner is still running.
    pub fn start<P, E, O>(
        &self,
        gears: GearRatio,
        config: DiscoveryConfig,
        enumerate: E,
        open: O,
    ) -> Result<ScanHandle<P>>
    where
        P: Port + 'static,
        E: FnOnce() -> Vec<CandidateDevice> + Send + 'static,
        O: FnMut(&CandidateDevice) -> Result<P> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ScanInProgress);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let (tx, rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("oquam-scan".into())
            .spawn(move || {
                let candidates = enumerate();
                let result = discover_with(candidates, gears, &config, open, || {
                    worker_cancel.load(Ordering::Relaxed) || crate::is_interrupted_requested()
                });

                if tx.send(result).is_err() {
                    // Receiver gone; a found controller is dropped and closed here
                    debug!("Scan result discarded");
                }
                drop(guard);
            })?;

        Ok(ScanHandle {
            rx,
            cancel,
            thread: Some(thread),
        })
    }

    /// Start a scan over the serial ports of this machine.
    #[cfg(feature = "native")]
    pub fn start_native(
        &self,
        gears: GearRatio,
        config: DiscoveryConfig,
    ) -> Result<ScanHandle<crate::port::NativePort>> {
        let serial = config.serial.clone();
        self.start(gears, config, crate::device::detect_ports, move |candidate| {
            crate::port::NativePort::open(&serial.for_port(&candidate.name))
        })
    }
}

/// Handle on a running scan.
///
/// Dropping the handle cancels the scan.
pub struct ScanHandle<P: Port> {
    rx: Receiver<Result<Discovered<P>>>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<P: Port> ScanHandle<P> {
    /// Ask the worker to stop before the next candidate.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Result if the scan has finished, without blocking.
    pub fn try_result(&mut self) -> Option<Result<Discovered<P>>> {
        match self.rx.try_recv() {
            Ok(result) => Some(self.finish(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.finish(Err(worker_lost()))),
        }
    }

    /// Wait up to `timeout` for the result.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<Discovered<P>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(self.finish(result)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.finish(Err(worker_lost()))),
        }
    }

    /// Block until the scan finishes.
    pub fn wait(mut self) -> Result<Discovered<P>> {
        let result = self.rx.recv().unwrap_or_else(|_| Err(worker_lost()));
        self.finish(result)
    }

    // Join the worker so the scanner is idle once a result is handed out
    fn finish(&mut self, result: Result<Discovered<P>>) -> Result<Discovered<P>> {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

impl<P: Port> Drop for ScanHandle<P> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
        }
    }
}

fn worker_lost() -> Error {
    Error::Io(io::Error::other("port scan worker stopped unexpectedly"))
}
