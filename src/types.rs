use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: ZoneMode,
    pub preset: String,
    pub presets: BTreeMap<String, ZonePreset>,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reconstruct: ReconstructConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub persist: PersistConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    Single,
    Dual,
}

/// One named zone preset: polygon per zone name. Which keys must be present
/// depends on the active mode (`single`, or `entry` + `exit`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZonePreset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<Vec<[i32; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Vec<[i32; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<Vec<[i32; 2]>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bounded job queue capacity. When full, new submissions are dropped.
    pub queue_capacity: usize,
    /// Crops shorter than this (px) are upscaled 2x before recognition.
    pub min_crop_height: u32,
    /// Apply a light unsharp mask after upscaling.
    pub sharpen: bool,
    /// Glyph detections below this confidence never reach reconstruction.
    pub confidence_threshold: f32,
    /// Cooldown window (seconds) per (track, zone) pair. Identity policy only.
    pub cooldown_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            min_crop_height: 80,
            sharpen: false,
            confidence_threshold: 0.5,
            cooldown_secs: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// Single session per monitored flow, closed by a quiet-period timeout.
    ZoneTimeout,
    /// Immediate per-(track, zone) events gated by the cooldown window.
    IdentityCooldown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub policy: SessionPolicy,
    /// Quiet period (seconds) after which an active session finalizes.
    pub timeout_secs: f64,
    /// Reads at or below this many characters are treated as noise.
    pub min_read_len: usize,
    /// Winners shorter than this trigger the smart-fill search.
    pub complete_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::ZoneTimeout,
            timeout_secs: 2.5,
            min_read_len: 2,
            complete_len: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructConfig {
    pub line_break: LineBreak,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            line_break: LineBreak::Relative(0.6),
        }
    }
}

/// How far apart two vertical centers may be before a new line starts.
///
/// Both variants have shipped at some point; the relative rule is the
/// default because it tracks image scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineBreak {
    /// Threshold = factor x mean observed character height.
    Relative(f32),
    /// Fixed pixel distance, independent of character size.
    AbsolutePx(f32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub input_dir: String,
    /// Frames per second to pace replay at. 0 = as fast as possible.
    pub target_fps: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input_dir: "traces".to_string(),
            target_fps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub output_dir: String,
    pub events_file: String,
    /// Optional endpoint that receives one JSON row per finalized event.
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
    pub jpeg_quality: u8,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            output_dir: "img".to_string(),
            events_file: "events.jsonl".to_string(),
            webhook_url: None,
            queue_capacity: 16,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// One character-detector hit inside a plate crop, in crop coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlyphDetection {
    pub bbox: BBox,
    pub glyph: String,
    pub confidence: f32,
}

/// Character count, not byte count. Plate text is frequently non-ASCII.
pub fn text_len(text: &str) -> usize {
    text.chars().count()
}
