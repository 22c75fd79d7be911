//! Connection lifecycle and the ingestion loop.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!      |               \-> Failed -> Disconnected
//!      \-> Failed -> Connecting
//! ```
//!
//! `Failed` is reserved for connect-time failures. A connect refused because
//! the radio is unavailable publishes `Failed` and stays there with no attempt
//! in flight; the next `connect()` starts from `Failed` and moves straight to
//! `Connecting`. Anything that ends an
//! established stream (peer hang-up, I/O error, `disconnect()`) lands in
//! `Disconnected`. Every state change is published to the `StateStore`
//! while the link lock is held, so subscribers observe transitions in the
//! order they happened.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::detect::{DetectionJob, DetectionWorker};
use crate::ingest::telemetry::preview;
use crate::ingest::{decode_record, FrameReader};
use crate::state::StateStore;
use crate::transport::{Channel, Radio, SERIAL_PORT_PROFILE};
use crate::ConnectionState;

/// Reasons `connect()` refuses to start an attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("radio '{0}' is unavailable or disabled")]
    RadioUnavailable(&'static str),

    #[error("session is already {0}")]
    AlreadyActive(ConnectionState),

    #[error("failed to spawn session worker: {0}")]
    Spawn(#[source] io::Error),
}

struct Link {
    state: ConnectionState,
    /// Bumped on every accepted `connect()`; stale workers compare against it.
    attempt: u64,
    running: Arc<AtomicBool>,
    channel: Option<Arc<dyn Channel>>,
}

struct Shared {
    radio: Arc<dyn Radio>,
    store: Arc<StateStore>,
    detector: Option<Arc<DetectionWorker>>,
    link: Mutex<Link>,
    frame_seq: AtomicU64,
}

/// Owns one point-to-point link to the wearable.
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        radio: Arc<dyn Radio>,
        store: Arc<StateStore>,
        detector: Option<Arc<DetectionWorker>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                radio,
                store,
                detector,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    attempt: 0,
                    running: Arc::new(AtomicBool::new(false)),
                    channel: None,
                }),
                frame_seq: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start connecting to `address` on a background thread.
    ///
    /// Returns once the attempt is under way; the outcome is reported through
    /// the connection-state channel of the store.
    pub fn connect(&self, address: &str) -> Result<(), SessionError> {
        let mut link = self.shared.lock_link();
        if matches!(
            link.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(SessionError::AlreadyActive(link.state));
        }
        if !self.shared.radio.is_available() {
            log::warn!(
                "connect to {} refused: radio '{}' unavailable",
                address,
                self.shared.radio.name()
            );
            self.shared.transition(&mut link, ConnectionState::Failed);
            return Err(SessionError::RadioUnavailable(self.shared.radio.name()));
        }

        link.attempt += 1;
        link.running = Arc::new(AtomicBool::new(true));
        link.channel = None;
        let attempt = link.attempt;
        let running = link.running.clone();
        self.shared.transition(&mut link, ConnectionState::Connecting);

        let shared = self.shared.clone();
        let target = address.to_string();
        let spawned = thread::Builder::new()
            .name("pathpal-session".to_string())
            .spawn(move || shared.run(attempt, running, target));
        match spawned {
            Ok(handle) => {
                drop(link);
                self.replace_worker(handle);
                Ok(())
            }
            Err(err) => {
                link.running.store(false, Ordering::SeqCst);
                self.shared.transition(&mut link, ConnectionState::Failed);
                self.shared.transition(&mut link, ConnectionState::Disconnected);
                Err(SessionError::Spawn(err))
            }
        }
    }

    /// Stop the current link. Safe to call at any time and from any thread.
    ///
    /// Closing the channel unblocks a read in progress; close errors are
    /// logged and otherwise ignored.
    pub fn disconnect(&self) {
        let mut link = self.shared.lock_link();
        link.running.store(false, Ordering::SeqCst);
        if let Some(channel) = link.channel.take() {
            log::info!("disconnecting from wearable");
            if let Err(err) = channel.close() {
                log::debug!("error closing channel (ignored): {}", err);
            }
        }
        self.shared
            .transition(&mut link, ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_link().state
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.shared.store
    }

    /// Wait for the most recent session thread to exit.
    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("session worker panicked");
            }
        }
    }

    fn replace_worker(&self, handle: JoinHandle<()>) {
        let previous = lock(&self.worker).replace(handle);
        // A previous worker that is still blocked in connect exits on its own
        // once it notices it is stale.
        if let Some(previous) = previous {
            if previous.is_finished() && previous.join().is_err() {
                log::warn!("session worker panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        lock(&self.link)
    }

    /// Apply a state change and publish it. No-op if the state is unchanged.
    fn transition(&self, link: &mut Link, next: ConnectionState) {
        if link.state == next {
            return;
        }
        log::debug!("connection {} -> {}", link.state, next);
        link.state = next;
        self.store.publish_connection_state(next);
    }

    fn is_current(&self, link: &Link, attempt: u64) -> bool {
        link.attempt == attempt
    }

    fn run(&self, attempt: u64, running: Arc<AtomicBool>, address: String) {
        log::info!(
            "connecting to {} via {} (service {})",
            address,
            self.radio.name(),
            SERIAL_PORT_PROFILE
        );
        let channel: Arc<dyn Channel> = match self.radio.open(&address, SERIAL_PORT_PROFILE) {
            Ok(channel) => Arc::from(channel),
            Err(err) => {
                let mut link = self.lock_link();
                if self.is_current(&link, attempt) && link.state == ConnectionState::Connecting {
                    log::warn!("connect to {} failed: {}", address, err);
                    running.store(false, Ordering::SeqCst);
                    self.transition(&mut link, ConnectionState::Failed);
                    self.transition(&mut link, ConnectionState::Disconnected);
                } else {
                    log::debug!("abandoned connect to {} failed: {}", address, err);
                }
                return;
            }
        };

        {
            let mut link = self.lock_link();
            if !self.is_current(&link, attempt) || !running.load(Ordering::SeqCst) {
                drop(link);
                log::debug!("connect to {} completed after cancel; closing", address);
                close_quietly(channel.as_ref());
                return;
            }
            link.channel = Some(channel.clone());
            self.transition(&mut link, ConnectionState::Connected);
        }
        log::info!("connected to {}", address);

        let outcome = self.ingest(channel.as_ref(), &running);
        self.finish(attempt, &running, channel.as_ref(), outcome);
    }

    /// Read records until the stream ends, fails, or the session is stopped.
    fn ingest(&self, channel: &dyn Channel, running: &AtomicBool) -> io::Result<()> {
        let mut frames = FrameReader::new(channel.reader()?);
        while running.load(Ordering::SeqCst) {
            let Some(record) = frames.next_record()? else {
                log::info!("wearable closed the stream");
                return Ok(());
            };
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match decode_record(&record) {
                Ok(snapshot) => {
                    let job = snapshot.image.clone().map(|payload| DetectionJob {
                        frame_id: self.frame_seq.fetch_add(1, Ordering::Relaxed) + 1,
                        payload,
                    });
                    self.store.publish_telemetry(snapshot);
                    if let (Some(job), Some(detector)) = (job, self.detector.as_ref()) {
                        detector.submit(job);
                    }
                }
                Err(err) => {
                    log::warn!("discarding record: {} ({})", err, preview(&record));
                }
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        attempt: u64,
        running: &AtomicBool,
        channel: &dyn Channel,
        outcome: io::Result<()>,
    ) {
        let was_running = running.swap(false, Ordering::SeqCst);
        match outcome {
            Err(err) if was_running => log::warn!("link lost: {}", err),
            Err(err) => log::debug!("read ended after disconnect: {}", err),
            Ok(()) => {}
        }
        {
            let mut link = self.lock_link();
            if self.is_current(&link, attempt) {
                link.channel = None;
                self.transition(&mut link, ConnectionState::Disconnected);
            }
        }
        close_quietly(channel);
    }
}

fn close_quietly(channel: &dyn Channel) {
    if let Err(err) = channel.close() {
        log::debug!("error closing channel (ignored): {}", err);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
