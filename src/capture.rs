// src/capture.rs
//
// Asynchronous capture pipeline: decouples per-crop recognition work from
// the real-time frame loop.
//
// One bounded job queue, exactly one worker task. The worker serializes
// recognition calls because the character model is a shared resource that
// must not be invoked concurrently. The producer never blocks: a full
// queue drops the newest submission (counted, logged at debug, not an
// error).
//
// Deduplication for the identity policy lives here too: the CooldownGate
// suppresses re-submission of the same (track, zone) pair inside a fixed
// window, evaluated by the producer before submit.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::RgbImage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pipeline::PipelineMetrics;
use crate::reconstruct::{self, CharacterObservation};
use crate::types::{CaptureConfig, GlyphDetection, LineBreak};
use crate::zones::ZoneKind;

/// Seam for a live character-detection model. The worker owns the detector
/// exclusively, so implementations do not need internal locking.
///
/// In replay deployments there is no live model; jobs carry the glyph
/// tuples recorded when the trace was captured and the detector is absent.
pub trait GlyphDetector: Send {
    fn detect(&mut self, crop: &RgbImage) -> Result<Vec<GlyphDetection>>;
}

/// One unit of recognition work for the worker.
#[derive(Debug)]
pub struct CaptureJob {
    pub track_id: Option<u64>,
    pub zone: ZoneKind,
    pub timestamp_s: f64,
    pub crop: Option<RgbImage>,
    /// Character-detector output recorded with the observation. Used when
    /// no live detector is wired.
    pub glyphs: Vec<GlyphDetection>,
}

/// A completed recognition, delivered back to the producer loop.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub track_id: Option<u64>,
    pub zone: ZoneKind,
    pub timestamp_s: f64,
    pub text: String,
    pub image: Option<Arc<RgbImage>>,
}

/// Last-accepted timestamps per (track, zone). Single-writer: only the
/// producer loop touches this.
#[derive(Debug, Default)]
pub struct CooldownGate {
    window_s: f64,
    last_accepted: HashMap<(u64, ZoneKind), f64>,
}

impl CooldownGate {
    pub fn new(window_s: f64) -> Self {
        Self {
            window_s,
            last_accepted: HashMap::new(),
        }
    }

    /// True if the pair is clear to submit; records the acceptance.
    /// A suppressed pair stays pinned to its original acceptance time, so
    /// the window measures from the last accepted capture, not the last
    /// sighting.
    pub fn accept(&mut self, track_id: u64, zone: ZoneKind, now_s: f64) -> bool {
        let key = (track_id, zone);
        if let Some(&t) = self.last_accepted.get(&key) {
            if now_s - t < self.window_s {
                return false;
            }
        }
        self.last_accepted.insert(key, now_s);
        true
    }

    /// Clears all cooldown state (source restart).
    pub fn reset(&mut self) {
        self.last_accepted.clear();
    }
}

pub struct CapturePipeline {
    jobs_tx: mpsc::Sender<CaptureJob>,
    results_rx: mpsc::Receiver<CaptureResult>,
    worker: JoinHandle<()>,
    metrics: PipelineMetrics,
}

impl CapturePipeline {
    /// Spawn the worker. `detector` is the live-model seam; pass None to
    /// recognize from the glyph tuples carried by each job.
    pub fn spawn(
        config: CaptureConfig,
        line_break: LineBreak,
        detector: Option<Box<dyn GlyphDetector>>,
        metrics: PipelineMetrics,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel(config.queue_capacity.max(1) * 2);

        let worker = tokio::spawn(worker_loop(
            jobs_rx,
            results_tx,
            detector,
            config,
            line_break,
        ));

        Self {
            jobs_tx,
            results_rx,
            worker,
            metrics,
        }
    }

    /// Non-blocking submit. Returns false when the job was dropped because
    /// the queue is full (drop-newest policy) or the worker is gone.
    pub fn submit(&self, job: CaptureJob) -> bool {
        match self.jobs_tx.try_send(job) {
            Ok(()) => {
                self.metrics.inc(&self.metrics.capture_submissions);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.inc(&self.metrics.capture_drops);
                debug!("capture queue full, dropping newest submission");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("capture worker gone, dropping submission");
                false
            }
        }
    }

    /// Drain whatever results are ready, without waiting.
    pub fn try_drain(&mut self) -> Vec<CaptureResult> {
        let mut out = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            self.metrics.inc(&self.metrics.captures_completed);
            out.push(result);
        }
        out
    }

    /// Stop accepting submissions, let in-flight work finish, and return
    /// any remaining results.
    pub async fn shutdown(mut self) -> Vec<CaptureResult> {
        drop(self.jobs_tx);
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                warn!("capture worker task error: {e}");
            }
        }
        let mut out = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            self.metrics.inc(&self.metrics.captures_completed);
            out.push(result);
        }
        out
    }
}

async fn worker_loop(
    mut jobs_rx: mpsc::Receiver<CaptureJob>,
    results_tx: mpsc::Sender<CaptureResult>,
    mut detector: Option<Box<dyn GlyphDetector>>,
    config: CaptureConfig,
    line_break: LineBreak,
) {
    while let Some(job) = jobs_rx.recv().await {
        let result = process_job(job, detector.as_deref_mut(), &config, line_break);
        // The worker may block here; the producer drains every frame, so
        // backpressure on this side only ever pauses the worker.
        if results_tx.send(result).await.is_err() {
            break;
        }
    }
}

fn process_job(
    job: CaptureJob,
    detector: Option<&mut (dyn GlyphDetector + '_)>,
    config: &CaptureConfig,
    line_break: LineBreak,
) -> CaptureResult {
    let crop = job
        .crop
        .map(|img| enhance_crop(img, config.min_crop_height, config.sharpen));

    let glyphs = match (detector, &crop) {
        (Some(det), Some(img)) => match det.detect(img) {
            Ok(glyphs) => glyphs,
            Err(e) => {
                // Recognition is skipped for this cycle; session mechanics
                // continue downstream with an empty read.
                warn!("glyph detection failed: {e}");
                Vec::new()
            }
        },
        _ => job.glyphs,
    };

    let observations: Vec<CharacterObservation> = glyphs
        .iter()
        .filter(|g| g.confidence >= config.confidence_threshold)
        .map(|g| {
            let center = g.bbox.center();
            CharacterObservation {
                cx: center.x as f32,
                cy: center.y as f32,
                glyph: g.glyph.clone(),
                height: g.bbox.height() as f32,
            }
        })
        .collect();

    let text = reconstruct::reconstruct(&observations, line_break);

    CaptureResult {
        track_id: job.track_id,
        zone: job.zone,
        timestamp_s: job.timestamp_s,
        text,
        image: crop.map(Arc::new),
    }
}

/// Upscale small crops 2x (linear) and optionally sharpen. Character
/// detection degrades sharply below ~80px of plate height.
fn enhance_crop(img: RgbImage, min_height: u32, sharpen: bool) -> RgbImage {
    let img = if img.height() < min_height && img.height() > 0 {
        image::imageops::resize(
            &img,
            img.width() * 2,
            img.height() * 2,
            FilterType::Triangle,
        )
    } else {
        img
    };

    if sharpen {
        image::imageops::unsharpen(&img, 1.0, 1)
    } else {
        img
    }
}
