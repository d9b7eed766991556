// src/pipeline/metrics.rs
//
// Pipeline observability. Soft failures (queue drops, suppressed
// submissions, sink errors) are counted here instead of being raised.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub plate_detections: Arc<AtomicU64>,
    pub zone_matches: Arc<AtomicU64>,
    pub capture_submissions: Arc<AtomicU64>,
    pub capture_drops: Arc<AtomicU64>,
    pub cooldown_suppressed: Arc<AtomicU64>,
    pub captures_completed: Arc<AtomicU64>,
    pub sessions_finalized: Arc<AtomicU64>,
    pub sessions_discarded: Arc<AtomicU64>,
    pub events_persisted: Arc<AtomicU64>,
    pub persist_failures: Arc<AtomicU64>,
    pub webhook_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            plate_detections: Arc::new(AtomicU64::new(0)),
            zone_matches: Arc::new(AtomicU64::new(0)),
            capture_submissions: Arc::new(AtomicU64::new(0)),
            capture_drops: Arc::new(AtomicU64::new(0)),
            cooldown_suppressed: Arc::new(AtomicU64::new(0)),
            captures_completed: Arc::new(AtomicU64::new(0)),
            sessions_finalized: Arc::new(AtomicU64::new(0)),
            sessions_discarded: Arc::new(AtomicU64::new(0)),
            events_persisted: Arc::new(AtomicU64::new(0)),
            persist_failures: Arc::new(AtomicU64::new(0)),
            webhook_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            plate_detections: self.plate_detections.load(Ordering::Relaxed),
            zone_matches: self.zone_matches.load(Ordering::Relaxed),
            capture_submissions: self.capture_submissions.load(Ordering::Relaxed),
            capture_drops: self.capture_drops.load(Ordering::Relaxed),
            cooldown_suppressed: self.cooldown_suppressed.load(Ordering::Relaxed),
            captures_completed: self.captures_completed.load(Ordering::Relaxed),
            sessions_finalized: self.sessions_finalized.load(Ordering::Relaxed),
            sessions_discarded: self.sessions_discarded.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            webhook_failures: self.webhook_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub plate_detections: u64,
    pub zone_matches: u64,
    pub capture_submissions: u64,
    pub capture_drops: u64,
    pub cooldown_suppressed: u64,
    pub captures_completed: u64,
    pub sessions_finalized: u64,
    pub sessions_discarded: u64,
    pub events_persisted: u64,
    pub persist_failures: u64,
    pub webhook_failures: u64,
    pub elapsed_secs: f64,
}
