// src/session.rs
//
// The session state machine. A session is one physical plate's dwell
// inside a zone, from first sighting to finalize. While active it keeps
// three capture slots:
//
//   first - earliest recorded capture (entry shot)
//   best  - running max by text score (most legible shot)
//   last  - most recent capture (exit shot)
//
// plus the list of accepted text reads. A quiet period longer than the
// timeout finalizes the session into at most one ReadEvent: majority-vote
// winner, smart-filled with a longer candidate when the winner looks
// truncated.
//
// Only one session exists at a time under this policy; it models a single
// physical lane with no concurrent distinguishable vehicles. When the
// upstream detector supplies stable track ids, the identity policy skips
// the merging entirely and emits one immediate event per accepted capture
// (dedup is the capture cooldown gate). The two policies are never mixed.

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, info};

use crate::capture::CaptureResult;
use crate::pipeline::PipelineMetrics;
use crate::types::{text_len, SessionConfig};
use crate::zones::ZoneKind;

/// Stand-in text when a capture slot is recorded before anything legible
/// was read.
const UNKNOWN_TEXT: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct CaptureSlot {
    pub image: Option<Arc<RgbImage>>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTag {
    First,
    Best,
    Last,
}

impl SlotTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "First",
            Self::Best => "Best",
            Self::Last => "Last",
        }
    }
}

/// A finalized, immutable read event. Image snapshots are Arc'd clones of
/// the session slots taken at finalize time; the next session cannot touch
/// them.
#[derive(Debug, Clone)]
pub struct ReadEvent {
    pub event_id: String,
    pub date: String,
    pub time: String,
    pub plate: String,
    pub direction: String,
    pub first_text: String,
    pub last_text: String,
    pub images: Vec<(SlotTag, Arc<RgbImage>)>,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Active {
        direction: ZoneKind,
        first: CaptureSlot,
        best: CaptureSlot,
        best_score: u32,
        last: CaptureSlot,
        reads: Vec<String>,
        last_seen_s: f64,
    },
}

pub struct SessionAggregator {
    state: SessionState,
    config: SessionConfig,
    metrics: PipelineMetrics,
}

impl SessionAggregator {
    pub fn new(config: SessionConfig, metrics: PipelineMetrics) -> Self {
        Self {
            state: SessionState::Idle,
            config,
            metrics,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, SessionState::Idle)
    }

    /// Feed one completed capture into the session. Opens a session when
    /// idle; every observation (including the opening one) then updates the
    /// last slot, the running best, and the read history.
    pub fn observe(&mut self, result: &CaptureResult) {
        if matches!(self.state, SessionState::Idle) {
            let first = CaptureSlot {
                image: result.image.clone(),
                text: slot_text(&result.text),
            };
            info!(
                "🚙 Session opened in zone '{}' (first read: {})",
                result.zone.as_str(),
                first.text
            );
            self.state = SessionState::Active {
                direction: result.zone,
                first,
                best: CaptureSlot {
                    image: None,
                    text: String::new(),
                },
                best_score: 0,
                last: CaptureSlot {
                    image: None,
                    text: String::new(),
                },
                reads: Vec::new(),
                last_seen_s: result.timestamp_s,
            };
        }

        if let SessionState::Active {
            best,
            best_score,
            last,
            reads,
            last_seen_s,
            ..
        } = &mut self.state
        {
            *last = CaptureSlot {
                image: result.image.clone(),
                text: slot_text(&result.text),
            };
            *last_seen_s = result.timestamp_s;

            let score = read_score(&result.text);
            if score > *best_score {
                *best_score = score;
                *best = CaptureSlot {
                    image: result.image.clone(),
                    text: result.text.clone(),
                };
            }

            if text_len(&result.text) > self.config.min_read_len {
                reads.push(result.text.clone());
            }
        }
    }

    /// Finalize if the quiet period has elapsed. `saw_zone_plate` reflects
    /// the current frame: a plate still sitting in the zone holds the
    /// session open even while its recognition is in flight.
    pub fn tick(&mut self, now_s: f64, saw_zone_plate: bool) -> Option<ReadEvent> {
        if saw_zone_plate {
            return None;
        }
        match &self.state {
            SessionState::Active { last_seen_s, .. }
                if now_s - last_seen_s > self.config.timeout_secs =>
            {
                self.finalize()
            }
            _ => None,
        }
    }

    /// Finalize immediately (end of source). Emits if anything was read.
    pub fn flush(&mut self) -> Option<ReadEvent> {
        self.finalize()
    }

    /// Hard discard without emission (external reset).
    pub fn reset(&mut self) {
        if self.is_active() {
            debug!("session reset, discarding partial state");
        }
        self.state = SessionState::Idle;
    }

    fn finalize(&mut self) -> Option<ReadEvent> {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        let (direction, first, best, last, reads) = match state {
            SessionState::Idle => return None,
            SessionState::Active {
                direction,
                first,
                best,
                last,
                reads,
                ..
            } => (direction, first, best, last, reads),
        };

        if reads.is_empty() {
            info!("❌ Session discarded (no text read)");
            self.metrics.inc(&self.metrics.sessions_discarded);
            return None;
        }

        let mut winner = majority_vote(&reads).to_string();
        if text_len(&winner) < self.config.complete_len {
            if let Some(longer) = longest_read(&reads, &winner) {
                debug!("smart fill: '{}' -> '{}'", winner, longer);
                winner = longer.to_string();
            }
        }

        let direction_label = direction.direction_label().to_string();
        info!("✅ Session finalized: [{}] {}", direction_label, winner);
        self.metrics.inc(&self.metrics.sessions_finalized);

        let mut images = Vec::new();
        for (tag, slot) in [
            (SlotTag::First, &first),
            (SlotTag::Best, &best),
            (SlotTag::Last, &last),
        ] {
            if let Some(img) = &slot.image {
                images.push((tag, Arc::clone(img)));
            }
        }

        let now = chrono::Local::now();
        Some(ReadEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            plate: winner,
            direction: direction_label,
            first_text: first.text,
            last_text: last.text,
            images,
        })
    }
}

/// An immediate event for the identity policy: one accepted capture, no
/// slot merging. The single image stands in for all three slots.
pub fn immediate_event(result: &CaptureResult) -> ReadEvent {
    let text = slot_text(&result.text);
    let images = match &result.image {
        Some(img) => vec![
            (SlotTag::First, Arc::clone(img)),
            (SlotTag::Best, Arc::clone(img)),
            (SlotTag::Last, Arc::clone(img)),
        ],
        None => Vec::new(),
    };
    let now = chrono::Local::now();
    ReadEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        date: now.format("%Y-%m-%d").to_string(),
        time: now.format("%H:%M:%S").to_string(),
        plate: result.text.clone(),
        direction: result.zone.direction_label().to_string(),
        first_text: text.clone(),
        last_text: text,
        images,
    }
}

/// Text length with a +10 bonus past 4 characters, so one nearly-complete
/// read outranks several fragments.
pub fn read_score(text: &str) -> u32 {
    let len = text_len(text) as u32;
    if len > 4 {
        len + 10
    } else {
        len
    }
}

fn slot_text(text: &str) -> String {
    if text_len(text) > 1 {
        text.to_string()
    } else {
        UNKNOWN_TEXT.to_string()
    }
}

/// Most frequent read; ties resolve to the earliest-seen candidate.
fn majority_vote(reads: &[String]) -> &str {
    let mut winner = "";
    let mut winner_count = 0usize;
    let mut seen: Vec<&str> = Vec::new();
    for read in reads {
        if seen.contains(&read.as_str()) {
            continue;
        }
        seen.push(read.as_str());
        let count = reads.iter().filter(|r| r.as_str() == read.as_str()).count();
        if count > winner_count {
            winner_count = count;
            winner = read.as_str();
        }
    }
    winner
}

/// The longest read strictly longer than `winner`, earliest among equals.
fn longest_read<'a>(reads: &'a [String], winner: &str) -> Option<&'a str> {
    let mut best: Option<&str> = None;
    for read in reads {
        let longer_than_best = match best {
            Some(b) => text_len(read) > text_len(b),
            None => text_len(read) > text_len(winner),
        };
        if longer_than_best {
            best = Some(read.as_str());
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(zone: ZoneKind, text: &str, ts: f64) -> CaptureResult {
        CaptureResult {
            track_id: None,
            zone,
            timestamp_s: ts,
            text: text.to_string(),
            image: None,
        }
    }

    fn aggregator() -> SessionAggregator {
        SessionAggregator::new(SessionConfig::default(), PipelineMetrics::new())
    }

    #[test]
    fn test_score_function() {
        assert_eq!(read_score("AB1"), 3);
        assert_eq!(read_score("AB123"), 15);
        assert_eq!(read_score(""), 0);
        assert_eq!(read_score("1234"), 4);
        // Thai text scores by characters, not bytes
        assert_eq!(read_score("กก1234"), 16);
    }

    #[test]
    fn test_empty_reads_discards_silently() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "", 1.0));
        assert!(agg.is_active());
        let event = agg.tick(10.0, false);
        assert!(event.is_none());
        assert!(!agg.is_active());
    }

    #[test]
    fn test_majority_vote_wins() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "กก1234", 1.0));
        agg.observe(&result(ZoneKind::Single, "กก1234", 1.1));
        agg.observe(&result(ZoneKind::Single, "บบ999", 1.2));
        let event = agg.tick(10.0, false).expect("event");
        assert_eq!(event.plate, "กก1234");
        assert_eq!(event.direction, "-");
    }

    #[test]
    fn test_majority_tie_resolves_to_earliest_seen() {
        let reads = vec![
            "ABC1".to_string(),
            "XYZ2".to_string(),
            "XYZ2".to_string(),
            "ABC1".to_string(),
        ];
        assert_eq!(majority_vote(&reads), "ABC1");
    }

    #[test]
    fn test_smart_fill_prefers_complete_read() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1", 1.0));
        agg.observe(&result(ZoneKind::Single, "AB1", 1.1));
        agg.observe(&result(ZoneKind::Single, "AB1234X", 1.2));
        let event = agg.tick(10.0, false).expect("event");
        // "AB1" wins the vote but is shorter than the completeness
        // threshold, so the longer candidate replaces it
        assert_eq!(event.plate, "AB1234X");
    }

    #[test]
    fn test_smart_fill_skipped_when_winner_complete() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB12345", 1.0));
        agg.observe(&result(ZoneKind::Single, "AB12345", 1.1));
        agg.observe(&result(ZoneKind::Single, "AB123456789", 1.2));
        let event = agg.tick(10.0, false).expect("event");
        assert_eq!(event.plate, "AB12345");
    }

    #[test]
    fn test_smart_fill_requires_strictly_longer() {
        let reads = vec!["AB1".to_string(), "CD2".to_string()];
        // Nothing longer than the winner exists
        assert_eq!(longest_read(&reads, "AB1"), None);
    }

    #[test]
    fn test_timeout_finalizes_exactly_once() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.0));
        agg.observe(&result(ZoneKind::Single, "AB1234", 2.0));

        // Within the quiet window: nothing
        assert!(agg.tick(3.0, false).is_none());
        assert!(agg.is_active());

        // Past the window: exactly one event
        let event = agg.tick(4.6, false);
        assert!(event.is_some());
        assert!(!agg.is_active());

        // Further idle ticks stay silent
        assert!(agg.tick(10.0, false).is_none());
        assert!(agg.tick(100.0, false).is_none());
    }

    #[test]
    fn test_plate_in_zone_holds_session_open() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.0));
        // Recognition lags, but the plate is still visibly in the zone
        assert!(agg.tick(10.0, true).is_none());
        assert!(agg.is_active());
    }

    #[test]
    fn test_direction_labels() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Entry, "AB1234", 1.0));
        let event = agg.tick(10.0, false).expect("event");
        assert_eq!(event.direction, "IN");

        agg.observe(&result(ZoneKind::Exit, "CD5678", 20.0));
        let event = agg.tick(30.0, false).expect("event");
        assert_eq!(event.direction, "OUT");
    }

    #[test]
    fn test_first_and_last_slots() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.0));
        agg.observe(&result(ZoneKind::Single, "AB12", 1.5));
        agg.observe(&result(ZoneKind::Single, "AB1299", 2.0));
        let event = agg.tick(10.0, false).expect("event");
        assert_eq!(event.first_text, "AB1234");
        assert_eq!(event.last_text, "AB1299");
    }

    #[test]
    fn test_unreadable_slots_use_placeholder() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "", 1.0));
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.5));
        agg.observe(&result(ZoneKind::Single, "X", 2.0));
        let event = agg.tick(10.0, false).expect("event");
        assert_eq!(event.first_text, "Unknown");
        assert_eq!(event.last_text, "Unknown");
        assert_eq!(event.plate, "AB1234");
    }

    #[test]
    fn test_short_reads_are_noise() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB", 1.0));
        agg.observe(&result(ZoneKind::Single, "A1", 1.5));
        // Nothing over two characters was ever read
        assert!(agg.tick(10.0, false).is_none());
    }

    #[test]
    fn test_best_replacement_requires_strictly_greater() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB123", 1.0));
        // Equal score must not displace the stored best
        agg.observe(&result(ZoneKind::Single, "CD456", 1.5));
        match &agg.state {
            SessionState::Active { best, .. } => assert_eq!(best.text, "AB123"),
            SessionState::Idle => panic!("session should be active"),
        }
    }

    #[test]
    fn test_flush_emits_pending_session() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.0));
        let event = agg.flush();
        assert!(event.is_some());
        assert!(!agg.is_active());
    }

    #[test]
    fn test_reset_discards_without_event() {
        let mut agg = aggregator();
        agg.observe(&result(ZoneKind::Single, "AB1234", 1.0));
        agg.reset();
        assert!(!agg.is_active());
        assert!(agg.tick(100.0, false).is_none());
    }

    #[test]
    fn test_immediate_event_mirrors_capture() {
        let event = immediate_event(&result(ZoneKind::Entry, "AB1234", 5.0));
        assert_eq!(event.plate, "AB1234");
        assert_eq!(event.direction, "IN");
        assert_eq!(event.first_text, "AB1234");
        assert_eq!(event.last_text, "AB1234");
    }
}
