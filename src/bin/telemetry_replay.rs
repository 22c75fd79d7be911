//! telemetry_replay - Run captured JSON-lines telemetry through the decoder.
//!
//! Reads a capture file (or stdin), frames it into records, decodes each one
//! and optionally runs detection on embedded frames. Prints one JSON summary
//! per record to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use pathpal_core::detect::build_backend;
use pathpal_core::ingest::telemetry::preview;
use pathpal_core::{
    decode_record, BoundingBox, DetectionPipeline, FrameReader, PathpaldConfig, TelemetrySnapshot,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay captured wearable telemetry")]
struct Args {
    /// Capture file with one JSON record per line. Reads stdin when omitted.
    input: Option<PathBuf>,

    /// Path to a JSON or TOML config file (detector settings).
    #[arg(long, env = "PATHPAL_CONFIG")]
    config: Option<PathBuf>,

    /// Run the detection pipeline on records that carry a frame.
    #[arg(long)]
    detect: bool,
}

#[derive(Serialize)]
struct RecordSummary {
    record: u64,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<TelemetrySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detections: Option<Vec<BoundingBox>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detection_error: Option<String>,
}

#[derive(Serialize)]
struct TelemetrySummary {
    bpm: u32,
    dist_cm: f64,
    accel: [f64; 3],
    gyro: [f64; 3],
    image_bytes: usize,
}

impl From<&TelemetrySnapshot> for TelemetrySummary {
    fn from(snap: &TelemetrySnapshot) -> Self {
        Self {
            bpm: snap.heart_rate_bpm,
            dist_cm: snap.distance_cm,
            accel: snap.acceleration,
            gyro: snap.angular_velocity,
            image_bytes: snap.image.as_ref().map(|i| i.len()).unwrap_or(0),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let pipeline = if args.detect {
        let cfg = PathpaldConfig::load_from(args.config.as_deref())?;
        let backend = build_backend(&cfg.detector)?;
        Some(DetectionPipeline::new(backend, cfg.detector.params()))
    } else {
        None
    };

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(
            std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut decoded = 0u64;
    let mut rejected = 0u64;
    let mut frame_id = 0u64;

    for (index, record) in FrameReader::new(input).enumerate() {
        let record = record.context("failed to read capture")?;
        let mut summary = RecordSummary {
            record: index as u64 + 1,
            ok: false,
            error: None,
            preview: None,
            telemetry: None,
            detections: None,
            detection_error: None,
        };
        match decode_record(&record) {
            Ok(snap) => {
                decoded += 1;
                summary.ok = true;
                summary.telemetry = Some(TelemetrySummary::from(&snap));
                if let (Some(pipeline), Some(payload)) = (pipeline.as_ref(), snap.image.as_ref()) {
                    frame_id += 1;
                    match pipeline.process(frame_id, payload) {
                        Ok(result) => summary.detections = Some(result.boxes),
                        Err(err) => summary.detection_error = Some(format!("{:#}", err)),
                    }
                }
            }
            Err(err) => {
                rejected += 1;
                summary.error = Some(err.to_string());
                summary.preview = Some(preview(&record));
            }
        }
        serde_json::to_writer(&mut out, &summary)?;
        writeln!(out)?;
    }
    out.flush()?;

    log::info!("{} record(s) decoded, {} rejected", decoded, rejected);
    Ok(())
}
