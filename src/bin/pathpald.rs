//! pathpald - PathPal wearable link daemon
//!
//! This daemon:
//! 1. Connects to the wearable through the serial bridge
//! 2. Decodes telemetry records and publishes them to the state store
//! 3. Runs crosswalk detection on embedded camera frames, off the read path
//! 4. Reconnects after a delay whenever the link drops or a connect fails
//! 5. Disconnects cleanly on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pathpal_core::detect::build_backend;
use pathpal_core::transport::TcpRadio;
use pathpal_core::{DetectionPipeline, DetectionWorker, PathpaldConfig, Session, StateStore};

/// How long the main loop waits for a state change before re-checking.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about = "PathPal wearable link daemon")]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "PATHPAL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the device address from the config.
    #[arg(long)]
    address: Option<String>,

    /// Exit after the first session ends instead of reconnecting.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = PathpaldConfig::load_from(args.config.as_deref())?;
    if let Some(address) = args.address {
        cfg.device.address = address;
        cfg.validate()?;
    }

    let store = Arc::new(StateStore::new());
    let backend = build_backend(&cfg.detector)?;
    let backend_name = backend.name();
    let pipeline = Arc::new(DetectionPipeline::new(backend, cfg.detector.params()));
    let shape = pipeline.shape();
    log::info!(
        "detector backend '{}' ({}x{} input, {} candidates, confidence > {}, iou {})",
        backend_name,
        shape.width,
        shape.height,
        shape.candidates,
        pipeline.params().confidence_threshold,
        pipeline.params().iou_threshold
    );
    let detector = Arc::new(DetectionWorker::spawn(
        pipeline,
        store.clone(),
        cfg.detector.queue_depth,
    )?);

    let mut radio = TcpRadio::new().with_enabled(cfg.device.radio_enabled);
    if !cfg.device.connect_timeout.is_zero() {
        radio = radio.with_connect_timeout(cfg.device.connect_timeout);
    }
    let session = Arc::new(Session::new(
        Arc::new(radio),
        store.clone(),
        Some(detector.clone()),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let session = session.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
            session.disconnect();
        })
        .context("error setting Ctrl-C handler")?;
    }

    log::info!("pathpald running. device {}", cfg.device.address);

    let mut connection = store.watch_connection();
    let mut telemetry = store.watch_telemetry();
    let mut detections = store.watch_detections();
    let mut next_attempt = Some(Instant::now());
    let mut attempted = false;

    while !stop.load(Ordering::SeqCst) {
        if !session.state().is_active() {
            if args.once && attempted {
                break;
            }
            match next_attempt {
                Some(at) if Instant::now() >= at => {
                    next_attempt = None;
                    attempted = true;
                    if let Err(err) = session.connect(&cfg.device.address) {
                        log::warn!("connect failed: {}", err);
                    }
                }
                Some(_) => {}
                None => next_attempt = Some(Instant::now() + cfg.device.reconnect_delay),
            }
        }

        if let Some(state) = connection.wait_for_change(POLL_INTERVAL) {
            log::info!("link {}", state);
        }
        if telemetry.has_changed() {
            let snap = telemetry.borrow_and_update();
            log::debug!(
                "telemetry bpm={} dist_cm={:.1} accel={:?} gyro={:?} frame={}",
                snap.heart_rate_bpm,
                snap.distance_cm,
                snap.acceleration,
                snap.angular_velocity,
                snap.has_image()
            );
        }
        if detections.has_changed() {
            if let Some(result) = detections.borrow_and_update().as_ref() {
                match result.best() {
                    Some(best) => log::info!(
                        "frame {}: {} {} at ({:.0},{:.0})-({:.0},{:.0}) score {:.2}",
                        result.frame_id,
                        result.boxes.len(),
                        best.label,
                        best.x1,
                        best.y1,
                        best.x2,
                        best.y2,
                        best.score
                    ),
                    None => log::debug!("frame {}: no detections", result.frame_id),
                }
            }
        }
    }

    log::info!("shutting down");
    session.disconnect();
    session.join();
    log::info!(
        "detector dropped {} frame(s) while busy",
        detector.dropped_frames()
    );
    Ok(())
}
