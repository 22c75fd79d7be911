//! Background detection dispatch.
//!
//! The ingestion loop hands frame-bearing snapshots to a single worker thread
//! through a bounded queue. Submission never blocks: when the queue is full
//! the frame is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use super::pipeline::DetectionPipeline;
use crate::ingest::ImagePayload;
use crate::state::StateStore;

/// One frame queued for detection.
#[derive(Clone, Debug)]
pub struct DetectionJob {
    pub frame_id: u64,
    pub payload: ImagePayload,
}

pub struct DetectionWorker {
    jobs: Option<SyncSender<DetectionJob>>,
    handle: Option<JoinHandle<()>>,
    dropped: AtomicU64,
}

impl DetectionWorker {
    /// Start the worker thread. Results are published to `store`.
    pub fn spawn(
        pipeline: Arc<DetectionPipeline>,
        store: Arc<StateStore>,
        queue_depth: usize,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(queue_depth.max(1));
        let handle = thread::Builder::new()
            .name("pathpal-detect".to_string())
            .spawn(move || run(pipeline, store, rx))
            .context("failed to spawn detection worker")?;
        Ok(Self {
            jobs: Some(tx),
            handle: Some(handle),
            dropped: AtomicU64::new(0),
        })
    }

    /// Queue a frame without blocking. Returns false if it was dropped.
    pub fn submit(&self, job: DetectionJob) -> bool {
        let Some(jobs) = self.jobs.as_ref() else {
            return false;
        };
        match jobs.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("detector busy, dropping frame {}", job.frame_id);
                false
            }
            Err(TrySendError::Disconnected(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("detection worker gone, dropping frame {}", job.frame_id);
                false
            }
        }
    }

    /// Frames dropped because the worker was busy or gone.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop after it drains.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("detection worker panicked");
            }
        }
    }
}

fn run(pipeline: Arc<DetectionPipeline>, store: Arc<StateStore>, jobs: Receiver<DetectionJob>) {
    for job in jobs {
        match pipeline.process(job.frame_id, &job.payload) {
            Ok(result) => {
                log::debug!(
                    "frame {}: {} detection(s)",
                    result.frame_id,
                    result.boxes.len()
                );
                store.publish_detections(result);
            }
            Err(err) => log::warn!("detection skipped: {:#}", err),
        }
    }
    log::debug!("detection worker stopped");
}
