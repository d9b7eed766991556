// src/reconstruct.rs
//
// Turns an unordered set of character detections from one plate crop into
// reading-order text: top line first, left to right within a line.
//
// Line grouping is a chain linkage, not a fixed-reference grouping: each
// observation is compared against the previously appended member of the
// current line, so a line can drift vertically across the plate without
// splitting.

use crate::types::LineBreak;

/// One decoded character inside a plate crop.
#[derive(Debug, Clone)]
pub struct CharacterObservation {
    pub cx: f32,
    pub cy: f32,
    pub glyph: String,
    pub height: f32,
}

/// Mean height never drops below this, so a degenerate set of zero-height
/// boxes still gets a usable relative threshold.
const MIN_AVG_HEIGHT: f32 = 1.0;

/// Reconstruct plate text from unordered character observations.
///
/// Sorting is stable throughout: observations tied on a coordinate keep
/// their original detection order. A vertical gap of exactly the threshold
/// starts a new line (strict `<` keeps a glyph on the current line).
pub fn reconstruct(observations: &[CharacterObservation], rule: LineBreak) -> String {
    if observations.is_empty() {
        return String::new();
    }

    let avg_height = (observations.iter().map(|o| o.height).sum::<f32>()
        / observations.len() as f32)
        .max(MIN_AVG_HEIGHT);

    let threshold = match rule {
        LineBreak::Relative(factor) => factor * avg_height,
        LineBreak::AbsolutePx(px) => px,
    };

    let mut by_row: Vec<&CharacterObservation> = observations.iter().collect();
    by_row.sort_by(|a, b| a.cy.total_cmp(&b.cy));

    let mut lines: Vec<Vec<&CharacterObservation>> = Vec::new();
    let mut current: Vec<&CharacterObservation> = vec![by_row[0]];
    for &obs in &by_row[1..] {
        let last = current[current.len() - 1];
        if (obs.cy - last.cy).abs() < threshold {
            current.push(obs);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push(obs);
        }
    }
    lines.push(current);

    let mut text = String::new();
    for line in &mut lines {
        line.sort_by(|a, b| a.cx.total_cmp(&b.cx));
        for obs in line.iter() {
            text.push_str(&obs.glyph);
        }
    }
    text
}
