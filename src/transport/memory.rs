//! In-process transport.
//!
//! `MemoryRadio` hands out pipes whose far end is a `MemoryDevice` that plays
//! the wearable: it writes records, hangs up, or injects a link error. Each
//! `expect_connection()` queues one device for the next `open()`; opening with
//! nothing queued fails like an unreachable peer.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::{Channel, Radio, ServiceId};

pub struct MemoryRadio {
    available: AtomicBool,
    queued: Mutex<VecDeque<Arc<Pipe>>>,
    opened: Mutex<Vec<(String, ServiceId)>>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            queued: Mutex::new(VecDeque::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue a device to answer the next `open()`.
    pub fn expect_connection(&self) -> MemoryDevice {
        let pipe = Arc::new(Pipe::default());
        lock(&self.queued).push_back(pipe.clone());
        MemoryDevice { pipe }
    }

    /// Every `(address, service)` pair `open()` was called with, in order.
    pub fn open_requests(&self) -> Vec<(String, ServiceId)> {
        lock(&self.opened).clone()
    }
}

impl Radio for MemoryRadio {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn open(&self, address: &str, service: ServiceId) -> io::Result<Box<dyn Channel>> {
        lock(&self.opened).push((address.to_string(), service));
        let pipe = lock(&self.queued).pop_front().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no device answering at {}", address),
            )
        })?;
        Ok(Box::new(MemoryChannel { pipe }))
    }
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote end of an in-process link.
#[derive(Clone)]
pub struct MemoryDevice {
    pipe: Arc<Pipe>,
}

impl MemoryDevice {
    pub fn send(&self, bytes: &[u8]) {
        self.pipe.update(|state| state.buf.extend(bytes.iter().copied()));
    }

    /// Send one record followed by a newline terminator.
    pub fn send_line(&self, record: &str) {
        self.pipe.update(|state| {
            state.buf.extend(record.as_bytes().iter().copied());
            state.buf.push_back(b'\n');
        });
    }

    /// End of stream after buffered bytes are drained.
    pub fn hang_up(&self) {
        self.pipe.update(|state| state.eof = true);
    }

    /// Fail the next read once buffered bytes are drained.
    pub fn fail(&self, kind: io::ErrorKind) {
        self.pipe.update(|state| state.error = Some(kind));
    }

    /// True once the host side has closed the channel.
    pub fn is_closed(&self) -> bool {
        lock(&self.pipe.state).closed
    }
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    eof: bool,
    closed: bool,
    error: Option<io::ErrorKind>,
}

#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn update(&self, f: impl FnOnce(&mut PipeState)) {
        f(&mut lock(&self.state));
        self.ready.notify_all();
    }
}

struct MemoryChannel {
    pipe: Arc<Pipe>,
}

impl Channel for MemoryChannel {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(PipeReader {
            pipe: self.pipe.clone(),
        }))
    }

    fn close(&self) -> io::Result<()> {
        self.pipe.update(|state| state.closed = true);
        Ok(())
    }
}

struct PipeReader {
    pipe: Arc<Pipe>,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.pipe.state);
        loop {
            if state.closed {
                return Ok(0);
            }
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for (slot, byte) in out.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if let Some(kind) = state.error.take() {
                return Err(io::Error::new(kind, "injected link failure"));
            }
            if state.eof {
                return Ok(0);
            }
            state = self
                .pipe
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
