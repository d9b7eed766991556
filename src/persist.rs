// src/persist.rs
//
// Single persistence task. Finalized read events arrive as immutable
// snapshots over a bounded channel and are written out here: three tagged
// JPEGs under a date/session directory, one JSONL record, and optionally a
// best-effort webhook POST of the row.
//
// Everything on this side is soft: a failed write or an unreachable
// endpoint is logged and counted, never retried, and never touches the
// aggregator.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::PipelineMetrics;
use crate::session::{ReadEvent, SlotTag};
use crate::types::PersistConfig;

/// The row shape handed to the JSONL log and the webhook. Matches the
/// column order of the original sheet: date, time, best, direction,
/// first, last.
#[derive(Debug, Clone, Serialize)]
pub struct ReadEventRecord {
    pub event_id: String,
    pub date: String,
    pub time: String,
    pub plate: String,
    pub direction: String,
    pub first: String,
    pub last: String,
}

impl ReadEventRecord {
    pub fn from_event(event: &ReadEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            date: event.date.clone(),
            time: event.time.clone(),
            plate: event.plate.clone(),
            direction: event.direction.clone(),
            first: event.first_text.clone(),
            last: event.last_text.clone(),
        }
    }
}

pub struct EventWriter {
    tx: mpsc::Sender<ReadEvent>,
    worker: JoinHandle<()>,
    metrics: PipelineMetrics,
}

impl EventWriter {
    pub fn spawn(config: PersistConfig, metrics: PipelineMetrics) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(writer_loop(rx, config, metrics.clone()));
        Self {
            tx,
            worker,
            metrics,
        }
    }

    /// Non-blocking hand-off. A full queue drops the event (logged as an
    /// error; the aggregator is never stalled by a slow disk).
    pub fn submit(&self, event: ReadEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(ev)) => {
                error!("persistence queue full, dropping event {}", ev.event_id);
                self.metrics.inc(&self.metrics.persist_failures);
                false
            }
            Err(TrySendError::Closed(ev)) => {
                error!("persistence task gone, dropping event {}", ev.event_id);
                self.metrics.inc(&self.metrics.persist_failures);
                false
            }
        }
    }

    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                warn!("persistence task error: {e}");
            }
        }
    }
}

async fn writer_loop(
    mut rx: mpsc::Receiver<ReadEvent>,
    config: PersistConfig,
    metrics: PipelineMetrics,
) {
    let client = reqwest::Client::new();

    while let Some(event) = rx.recv().await {
        let record = ReadEventRecord::from_event(&event);

        match write_event(&config, &event) {
            Ok(dir) => {
                metrics.inc(&metrics.events_persisted);
                info!("💾 Saved event {} -> {}", record.plate, dir.display());
            }
            Err(e) => {
                metrics.inc(&metrics.persist_failures);
                error!("failed to persist event {}: {e:#}", event.event_id);
            }
        }

        if let Some(url) = &config.webhook_url {
            post_row(&client, url, &record, &metrics).await;
        }
    }
}

/// Write the JPEGs and the JSONL record. Returns the session directory.
fn write_event(config: &PersistConfig, event: &ReadEvent) -> Result<PathBuf> {
    let dir = session_dir(&config.output_dir, event);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let time_part = event.time.replace(':', "-");
    for (tag, img) in &event.images {
        let text = match tag {
            SlotTag::First => &event.first_text,
            SlotTag::Best => &event.plate,
            SlotTag::Last => &event.last_text,
        };
        let name = format!(
            "{}_{}_{}_{}.jpg",
            sanitize_component(text),
            tag.as_str(),
            event.date,
            time_part
        );
        let path = dir.join(name);
        let jpeg = encode_jpeg(img, config.jpeg_quality)?;
        std::fs::write(&path, jpeg).with_context(|| format!("writing {}", path.display()))?;
        debug!("wrote {}", path.display());
    }

    append_record(&config.events_file, &ReadEventRecord::from_event(event))?;
    Ok(dir)
}

/// `<out>/<date>/<SafePlate>_<date>_<time>[_<direction>]`
fn session_dir(output_dir: &str, event: &ReadEvent) -> PathBuf {
    let time_part = event.time.replace(':', "-");
    let mut name = format!(
        "{}_{}_{}",
        sanitize_component(&event.plate),
        event.date,
        time_part
    );
    if event.direction != "-" {
        name.push('_');
        name.push_str(&event.direction);
    }
    Path::new(output_dir).join(&event.date).join(name)
}

fn append_record(path: &str, record: &ReadEventRecord) -> Result<()> {
    use std::io::Write;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path}"))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

async fn post_row(
    client: &reqwest::Client,
    url: &str,
    record: &ReadEventRecord,
    metrics: &PipelineMetrics,
) {
    let request = client
        .post(url)
        .timeout(Duration::from_secs(5))
        .json(record);
    match request.send().await {
        Ok(response) if response.status().is_success() => {
            debug!("webhook accepted event {}", record.event_id);
        }
        Ok(response) => {
            metrics.inc(&metrics.webhook_failures);
            warn!("webhook returned {} for {}", response.status(), record.event_id);
        }
        Err(e) => {
            metrics.inc(&metrics.webhook_failures);
            warn!("webhook post failed for {}: {e}", record.event_id);
        }
    }
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

/// Keep alphanumerics, dash, underscore; spaces are allowed through the
/// filter but stripped afterwards. An empty result falls back to a
/// placeholder so the path is always valid.
fn sanitize_component(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let kept = kept.replace(' ', "");
    if kept.is_empty() {
        "Unknown".to_string()
    } else {
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(plate: &str, direction: &str) -> ReadEvent {
        ReadEvent {
            event_id: "test-event".to_string(),
            date: "2026-08-04".to_string(),
            time: "14:02:33".to_string(),
            plate: plate.to_string(),
            direction: direction.to_string(),
            first_text: "Unknown".to_string(),
            last_text: plate.to_string(),
            images: vec![(SlotTag::Best, Arc::new(RgbImage::new(8, 8)))],
        }
    }

    #[test]
    fn test_sanitize_keeps_alphanumerics() {
        assert_eq!(sanitize_component("AB-12_34"), "AB-12_34");
        assert_eq!(sanitize_component("กก1234"), "กก1234");
    }

    #[test]
    fn test_sanitize_strips_spaces_and_punctuation() {
        assert_eq!(sanitize_component("AB 12/34"), "AB1234");
        assert_eq!(sanitize_component("a\\b:c*d"), "abcd");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_component(""), "Unknown");
        assert_eq!(sanitize_component("///"), "Unknown");
        assert_eq!(sanitize_component("   "), "Unknown");
    }

    #[test]
    fn test_session_dir_single_mode() {
        let dir = session_dir("img", &event("AB1234", "-"));
        assert_eq!(
            dir,
            Path::new("img/2026-08-04/AB1234_2026-08-04_14-02-33")
        );
    }

    #[test]
    fn test_session_dir_dual_mode_suffix() {
        let dir = session_dir("img", &event("AB1234", "IN"));
        assert_eq!(
            dir,
            Path::new("img/2026-08-04/AB1234_2026-08-04_14-02-33_IN")
        );
    }

    #[test]
    fn test_record_row_shape() {
        let record = ReadEventRecord::from_event(&event("AB1234", "OUT"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"plate\":\"AB1234\""));
        assert!(json.contains("\"direction\":\"OUT\""));
        assert!(json.contains("\"first\":\"Unknown\""));
    }

    #[test]
    fn test_write_event_creates_images_and_log() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PersistConfig {
            output_dir: tmp.path().join("img").to_string_lossy().into_owned(),
            events_file: tmp.path().join("events.jsonl").to_string_lossy().into_owned(),
            ..PersistConfig::default()
        };

        let dir = write_event(&config, &event("AB1234", "IN")).unwrap();
        assert!(dir.ends_with("AB1234_2026-08-04_14-02-33_IN"));

        let jpeg = dir.join("AB1234_Best_2026-08-04_14-02-33.jpg");
        assert!(jpeg.exists());

        let log = std::fs::read_to_string(&config.events_file).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("AB1234"));
    }
}
