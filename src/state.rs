//! Latest-value state shared with presentation layers.
//!
//! `StateStore` holds three independent channels: telemetry, connection state,
//! and detection results. Each channel keeps only the most recent value.
//!
//! - Publishing swaps an `Arc` under a short lock and never waits on readers
//! - Readers get the whole value that was current at the time of the read
//! - `Watcher` tracks a version so a reader can tell (or wait) when a value changed
//! - `listen()` gives an ordered feed of values published after the call. The
//!   feed holds at most `LISTEN_DEPTH` undelivered values; while it is full new
//!   values skip that listener and are counted in `missed()`

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::detect::DetectionResult;
use crate::ingest::TelemetrySnapshot;
use crate::ConnectionState;

/// Undelivered values a `listen()` feed holds before it starts missing values.
pub const LISTEN_DEPTH: usize = 64;

struct Slot<T> {
    value: Arc<T>,
    version: u64,
    listeners: Vec<SyncSender<Arc<T>>>,
    missed: u64,
}

/// Single latest-value channel.
pub struct Latest<T> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> Latest<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: Arc::new(initial),
                version: 0,
                listeners: Vec::new(),
                missed: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Replace the current value. Returns the new version.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let version = {
            let mut slot = self.lock();
            slot.value = value.clone();
            slot.version += 1;
            let mut missed = 0;
            slot.listeners
                .retain(|listener| match listener.try_send(value.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        missed += 1;
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                });
            slot.missed += missed;
            slot.version
        };
        self.changed.notify_all();
        version
    }

    pub fn current(&self) -> Arc<T> {
        self.lock().value.clone()
    }

    /// Number of publishes so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Values that skipped a full listener feed, summed over all listeners.
    pub fn missed(&self) -> u64 {
        self.lock().missed
    }

    /// Feed of values published from now on, in publish order, with a
    /// backlog of `LISTEN_DEPTH`.
    /// The feed is dropped from the channel once the receiver goes away.
    pub fn listen(&self) -> Receiver<Arc<T>> {
        self.listen_with_depth(LISTEN_DEPTH)
    }

    pub fn listen_with_depth(&self, depth: usize) -> Receiver<Arc<T>> {
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        self.lock().listeners.push(tx);
        rx
    }

    fn snapshot(&self) -> (Arc<T>, u64) {
        let slot = self.lock();
        (slot.value.clone(), slot.version)
    }

    /// Block until the version moves past `seen` or `timeout` elapses.
    fn wait_past(&self, seen: u64, timeout: Duration) -> Option<(Arc<T>, u64)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while slot.version <= seen {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self
                .changed
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
            if result.timed_out() && slot.version <= seen {
                return None;
            }
        }
        Some((slot.value.clone(), slot.version))
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reader handle that remembers which version it last observed.
pub struct Watcher<T> {
    channel: Arc<Latest<T>>,
    seen: u64,
}

impl<T> Watcher<T> {
    fn new(channel: Arc<Latest<T>>) -> Self {
        let seen = channel.version();
        Self { channel, seen }
    }

    pub fn has_changed(&self) -> bool {
        self.channel.version() > self.seen
    }

    /// Current value, marking it as seen.
    pub fn borrow_and_update(&mut self) -> Arc<T> {
        let (value, version) = self.channel.snapshot();
        self.seen = version;
        value
    }

    /// Wait for a value newer than the last one seen. Intermediate values
    /// published while the watcher was not looking are skipped.
    pub fn wait_for_change(&mut self, timeout: Duration) -> Option<Arc<T>> {
        let (value, version) = self.channel.wait_past(self.seen, timeout)?;
        self.seen = version;
        Some(value)
    }
}

impl<T> Clone for Watcher<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            seen: self.seen,
        }
    }
}

/// Shared state consumed by presentation layers.
pub struct StateStore {
    telemetry: Arc<Latest<TelemetrySnapshot>>,
    connection: Arc<Latest<ConnectionState>>,
    detections: Arc<Latest<Option<DetectionResult>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            telemetry: Arc::new(Latest::new(TelemetrySnapshot::default())),
            connection: Arc::new(Latest::new(ConnectionState::Disconnected)),
            detections: Arc::new(Latest::new(None)),
        }
    }

    pub fn publish_telemetry(&self, snapshot: TelemetrySnapshot) -> u64 {
        self.telemetry.publish(snapshot)
    }

    pub fn publish_connection_state(&self, state: ConnectionState) -> u64 {
        self.connection.publish(state)
    }

    pub fn publish_detections(&self, result: DetectionResult) -> u64 {
        self.detections.publish(Some(result))
    }

    pub fn telemetry(&self) -> Arc<TelemetrySnapshot> {
        self.telemetry.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.current()
    }

    pub fn detections(&self) -> Arc<Option<DetectionResult>> {
        self.detections.current()
    }

    pub fn watch_telemetry(&self) -> Watcher<TelemetrySnapshot> {
        Watcher::new(self.telemetry.clone())
    }

    pub fn watch_connection(&self) -> Watcher<ConnectionState> {
        Watcher::new(self.connection.clone())
    }

    pub fn watch_detections(&self) -> Watcher<Option<DetectionResult>> {
        Watcher::new(self.detections.clone())
    }

    pub fn telemetry_channel(&self) -> &Latest<TelemetrySnapshot> {
        &self.telemetry
    }

    pub fn connection_channel(&self) -> &Latest<ConnectionState> {
        &self.connection
    }

    pub fn detection_channel(&self) -> &Latest<Option<DetectionResult>> {
        &self.detections
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_replaces_value_and_bumps_version() {
        let channel = Latest::new(1u32);
        assert_eq!(*channel.current(), 1);
        assert_eq!(channel.version(), 0);
        assert_eq!(channel.publish(2), 1);
        assert_eq!(channel.publish(3), 2);
        assert_eq!(*channel.current(), 3);
    }

    #[test]
    fn readers_keep_their_value_after_replacement() {
        let channel = Latest::new(vec![1, 2, 3]);
        let held = channel.current();
        channel.publish(vec![9]);
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(*channel.current(), vec![9]);
    }

    #[test]
    fn listeners_see_every_value_in_order() {
        let channel = Latest::new(0u32);
        let feed = channel.listen();
        for v in 1..=5 {
            channel.publish(v);
        }
        let got: Vec<u32> = feed.try_iter().map(|v| *v).collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn dropped_listener_does_not_block_publish() {
        let channel = Latest::new(0u32);
        drop(channel.listen());
        channel.publish(1);
        assert!(channel.lock().listeners.is_empty());
    }

    #[test]
    fn undrained_listener_holds_a_bounded_backlog() {
        let channel = Latest::new(0u32);
        let stalled = channel.listen_with_depth(4);
        let live = channel.listen();
        for v in 1..=100 {
            channel.publish(v);
            assert_eq!(*live.recv().unwrap(), v);
        }

        let held: Vec<u32> = stalled.try_iter().map(|v| *v).collect();
        assert_eq!(held, vec![1, 2, 3, 4]);
        assert_eq!(channel.missed(), 96);
        assert_eq!(*channel.current(), 100);

        // Still subscribed once it catches up.
        channel.publish(101);
        assert_eq!(*stalled.try_recv().unwrap(), 101);
        assert_eq!(channel.lock().listeners.len(), 2);
    }

    #[test]
    fn watcher_tracks_changes() {
        let store = StateStore::new();
        let mut watcher = store.watch_connection();
        assert!(!watcher.has_changed());
        store.publish_connection_state(ConnectionState::Connecting);
        assert!(watcher.has_changed());
        assert_eq!(*watcher.borrow_and_update(), ConnectionState::Connecting);
        assert!(!watcher.has_changed());
    }

    #[test]
    fn wait_for_change_times_out_without_publish() {
        let store = StateStore::new();
        let mut watcher = store.watch_telemetry();
        assert!(watcher.wait_for_change(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_for_change_wakes_on_publish() {
        let store = Arc::new(StateStore::new());
        let mut watcher = store.watch_telemetry();
        let publisher = {
            let store = store.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                store.publish_telemetry(TelemetrySnapshot {
                    heart_rate_bpm: 88,
                    ..TelemetrySnapshot::default()
                });
            })
        };
        let snap = watcher
            .wait_for_change(Duration::from_secs(2))
            .expect("telemetry published");
        assert_eq!(snap.heart_rate_bpm, 88);
        publisher.join().unwrap();
    }

    #[test]
    fn concurrent_readers_never_see_torn_values() {
        let channel = Arc::new(Latest::new((0u64, 0u64)));
        let writer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..=2_000u64 {
                    channel.publish((i, i * 2));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let (a, b) = *channel.current();
                        assert_eq!(b, a * 2);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn store_starts_disconnected_with_no_detections() {
        let store = StateStore::default();
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        assert!(store.detections().is_none());
        assert_eq!(*store.telemetry(), TelemetrySnapshot::default());
    }
}
