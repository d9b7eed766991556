// src/main.rs

mod capture;
mod config;
mod persist;
mod pipeline;
mod reconstruct;
mod session;
mod trace;
mod types;
mod zones;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use capture::{CaptureJob, CapturePipeline, CaptureResult, CooldownGate};
use persist::EventWriter;
use pipeline::PipelineMetrics;
use session::SessionAggregator;
use tokio::sync::watch;
use tracing::{error, info};
use types::{text_len, Config, SessionPolicy};
use zones::ZoneLayout;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plate_gate=info".into()),
        )
        .init();

    info!("🚘 Plate Gate starting");

    let config = Config::load("config.yaml")?;
    info!(
        "✓ Configuration loaded: preset '{}', {:?} mode, {:?} policy",
        config.preset, config.mode, config.session.policy
    );

    let layout = config.zone_layout()?;
    // The sender half is the seam for a live zone editor: swap a whole
    // layout, never a point. Replay keeps the configured layout.
    let (_zones_tx, zones_rx) = watch::channel(layout);

    let metrics = PipelineMetrics::new();
    let writer = EventWriter::spawn(config.persist.clone(), metrics.clone());

    let traces = trace::find_trace_files(&config.replay.input_dir)?;
    if traces.is_empty() {
        error!("No trace files found in {}", config.replay.input_dir);
        return Ok(());
    }

    for (idx, path) in traces.iter().enumerate() {
        info!(
            "Processing trace {}/{}: {}",
            idx + 1,
            traces.len(),
            path.display()
        );
        if let Err(e) = process_trace(path, &config, zones_rx.clone(), &writer, &metrics).await {
            error!("Trace {} failed: {e:#}", path.display());
        }
    }

    let summary = metrics.summary();
    info!(
        "✓ Replay complete: {} frames, {} zone hits, {} sessions finalized, {} events persisted",
        summary.total_frames,
        summary.zone_matches,
        summary.sessions_finalized,
        summary.events_persisted
    );
    if summary.capture_drops > 0 || summary.cooldown_suppressed > 0 {
        info!(
            "  soft drops: {} queue, {} cooldown-suppressed",
            summary.capture_drops, summary.cooldown_suppressed
        );
    }

    writer.shutdown().await;
    Ok(())
}

/// Replay one trace file through the full pipeline. The session is flushed
/// at end of source, matching a live deployment's source-restart reset.
async fn process_trace(
    path: &Path,
    config: &Config,
    zones_rx: watch::Receiver<ZoneLayout>,
    writer: &EventWriter,
    metrics: &PipelineMetrics,
) -> Result<()> {
    let mut reader = trace::TraceReader::open(path)?;
    // No live character model in replay; jobs carry recorded glyphs.
    let mut pipeline = CapturePipeline::spawn(
        config.capture.clone(),
        config.reconstruct.line_break,
        None,
        metrics.clone(),
    );
    let mut aggregator = SessionAggregator::new(config.session.clone(), metrics.clone());
    let mut gate = CooldownGate::new(config.capture.cooldown_secs);

    let frame_interval = if config.replay.target_fps > 0 {
        Some(Duration::from_secs_f64(1.0 / config.replay.target_fps as f64))
    } else {
        None
    };

    let mut frames = 0u64;
    while let Some(frame) = reader.next_frame() {
        frames += 1;
        metrics.inc(&metrics.total_frames);

        let mut saw_zone_plate = false;
        {
            let layout = zones_rx.borrow();
            for plate in &frame.plates {
                metrics.inc(&metrics.plate_detections);

                let Some(zone) = layout.classify(plate.bbox.center()) else {
                    continue;
                };
                metrics.inc(&metrics.zone_matches);
                saw_zone_plate = true;

                if config.session.policy == SessionPolicy::IdentityCooldown {
                    if let Some(track_id) = plate.track_id {
                        if !gate.accept(track_id, zone, frame.timestamp_s) {
                            metrics.inc(&metrics.cooldown_suppressed);
                            continue;
                        }
                    }
                }

                pipeline.submit(CaptureJob {
                    track_id: plate.track_id,
                    zone,
                    timestamp_s: frame.timestamp_s,
                    crop: plate.decode_crop(),
                    glyphs: plate.glyphs.clone(),
                });
            }
        }

        for result in pipeline.try_drain() {
            handle_result(&result, config, &mut aggregator, writer);
        }

        if config.session.policy == SessionPolicy::ZoneTimeout {
            if let Some(event) = aggregator.tick(frame.timestamp_s, saw_zone_plate) {
                writer.submit(event);
            }
        }

        match frame_interval {
            Some(interval) => tokio::time::sleep(interval).await,
            None => tokio::task::yield_now().await,
        }
    }

    // End of source: let in-flight recognition finish, then flush.
    for result in pipeline.shutdown().await {
        handle_result(&result, config, &mut aggregator, writer);
    }
    if let Some(event) = aggregator.flush() {
        writer.submit(event);
    }

    info!("✓ Trace done: {} frames from {}", frames, path.display());
    Ok(())
}

fn handle_result(
    result: &CaptureResult,
    config: &Config,
    aggregator: &mut SessionAggregator,
    writer: &EventWriter,
) {
    match config.session.policy {
        SessionPolicy::ZoneTimeout => aggregator.observe(result),
        SessionPolicy::IdentityCooldown => {
            // No session merging under this policy; noise-length reads are
            // dropped here the way the aggregator drops them from its list.
            if text_len(&result.text) > config.session.min_read_len {
                writer.submit(session::immediate_event(result));
            }
        }
    }
}
