// src/trace.rs
//
// Detection trace replay. The plate and character detectors are external;
// their per-frame output reaches this system as JSONL trace files, one
// record per processed frame. Crops travel base64-JPEG-encoded at source
// resolution.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use image::RgbImage;
use serde::Deserialize;
use tracing::{info, warn};

use crate::types::{BBox, GlyphDetection};

#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub timestamp_s: f64,
    #[serde(default)]
    pub plates: Vec<PlateRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlateRecord {
    pub bbox: BBox,
    #[serde(default)]
    pub track_id: Option<u64>,
    /// Base64 JPEG of the plate crop, taken at full source resolution.
    #[serde(default)]
    pub crop_b64: Option<String>,
    #[serde(default)]
    pub glyphs: Vec<GlyphDetection>,
}

impl PlateRecord {
    /// Decode the carried crop, if any. A corrupt payload is a soft
    /// failure: the observation continues without an image.
    pub fn decode_crop(&self) -> Option<RgbImage> {
        let b64 = self.crop_b64.as_ref()?;
        let bytes = match base64::engine::general_purpose::STANDARD.decode(b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("bad crop payload: {e}");
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                warn!("undecodable crop image: {e}");
                None
            }
        }
    }
}

/// Recursively collect `.jsonl` trace files under `dir`, sorted for a
/// stable replay order.
pub fn find_trace_files(dir: &str) -> Result<Vec<PathBuf>> {
    let mut traces = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            traces.push(path.to_path_buf());
        }
    }
    traces.sort();
    info!("Found {} trace file(s)", traces.len());
    Ok(traces)
}

pub struct TraceReader {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    line_no: usize,
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path: path.to_path_buf(),
            line_no: 0,
        })
    }

    /// Next frame record, skipping blank and malformed lines. None at end
    /// of the trace.
    pub fn next_frame(&mut self) -> Option<FrameRecord> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("read error in {}: {e}", self.path.display());
                    return None;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FrameRecord>(&line) {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(
                        "skipping malformed record at {}:{}: {e}",
                        self.path.display(),
                        self.line_no
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cam1.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        (tmp, path)
    }

    #[test]
    fn test_reads_frame_records() {
        let (_tmp, path) = write_trace(&[
            r#"{"frame_id":1,"timestamp_s":0.033,"plates":[]}"#,
            r#"{"frame_id":2,"timestamp_s":0.066,"plates":[{"bbox":{"x1":10,"y1":20,"x2":110,"y2":60},"track_id":5,"glyphs":[{"bbox":{"x1":0,"y1":0,"x2":10,"y2":30},"glyph":"A","confidence":0.9}]}]}"#,
        ]);
        let mut reader = TraceReader::open(&path).unwrap();

        let first = reader.next_frame().unwrap();
        assert_eq!(first.frame_id, 1);
        assert!(first.plates.is_empty());

        let second = reader.next_frame().unwrap();
        assert_eq!(second.plates.len(), 1);
        let plate = &second.plates[0];
        assert_eq!(plate.track_id, Some(5));
        assert_eq!(plate.glyphs[0].glyph, "A");
        assert_eq!(plate.bbox.center().x, 60);

        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (_tmp, path) = write_trace(&[
            "not json at all",
            "",
            r#"{"frame_id":7,"timestamp_s":1.0}"#,
        ]);
        let mut reader = TraceReader::open(&path).unwrap();
        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.frame_id, 7);
        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn test_find_trace_files_filters_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.jsonl"), "").unwrap();

        let traces = find_trace_files(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(traces.len(), 2);
    }

    #[test]
    fn test_missing_crop_decodes_to_none() {
        let plate = PlateRecord {
            bbox: BBox {
                x1: 0,
                y1: 0,
                x2: 10,
                y2: 10,
            },
            track_id: None,
            crop_b64: None,
            glyphs: Vec::new(),
        };
        assert!(plate.decode_crop().is_none());
    }

    #[test]
    fn test_garbage_crop_decodes_to_none() {
        let plate = PlateRecord {
            bbox: BBox {
                x1: 0,
                y1: 0,
                x2: 10,
                y2: 10,
            },
            track_id: None,
            crop_b64: Some("!!!not-base64!!!".to_string()),
            glyphs: Vec::new(),
        };
        assert!(plate.decode_crop().is_none());
    }

    #[test]
    fn test_crop_round_trip() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([120, 40, 200]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut buf, 90,
        ))
        .unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(buf.into_inner());

        let plate = PlateRecord {
            bbox: BBox {
                x1: 0,
                y1: 0,
                x2: 16,
                y2: 8,
            },
            track_id: Some(1),
            crop_b64: Some(b64),
            glyphs: Vec::new(),
        };
        let decoded = plate.decode_crop().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
