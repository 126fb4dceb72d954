//! Resume positions saved from relayed `state` frames.
//!
//! A target reports its position every second or so; the hub keeps at most
//! one save per device every [`SAVE_INTERVAL`], always saves when the video
//! changes or the device leaves, and clears the position once playback is
//! close enough to the end that resuming would be pointless.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use remote_proto::protocol::{Payload, ProfileId};
use serde_json::Value;

pub const SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Positions at or below this are not worth resuming from.
const MIN_POSITION: f64 = 5.0;
/// Within this many seconds of the end the video counts as finished.
const END_MARGIN: f64 = 30.0;
const END_FRACTION: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct SavedPosition {
    pub video_id: String,
    /// Seconds, rounded to 0.1.  Zero clears a finished video.
    pub position: f64,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_secs: u64,
    /// `m:ss` or `h:mm:ss`; empty when the duration is unknown.
    pub duration_label: String,
}

/// Where saved positions go.  The hosting app plugs in its history store.
pub trait PositionStore: Send + Sync {
    fn save_position(&self, profile_id: ProfileId, position: SavedPosition);
}

/// In-process store used when nothing else is configured.
#[derive(Debug, Default)]
pub struct MemoryPositions {
    saved: RwLock<HashMap<(ProfileId, String), SavedPosition>>,
}

impl MemoryPositions {
    pub fn get(&self, profile_id: ProfileId, video_id: &str) -> Option<SavedPosition> {
        let saved = self.saved.read().ok()?;
        saved.get(&(profile_id, video_id.to_string())).cloned()
    }
}

impl PositionStore for MemoryPositions {
    fn save_position(&self, profile_id: ProfileId, position: SavedPosition) {
        tracing::debug!(
            "saved {} at {}s for profile {}",
            position.video_id,
            position.position,
            profile_id
        );
        if let Ok(mut saved) = self.saved.write() {
            saved.insert((profile_id, position.video_id.clone()), position);
        }
    }
}

/// Per-device save throttle.
#[derive(Debug, Default)]
pub struct PositionTracker {
    last_save: Option<Instant>,
}

impl PositionTracker {
    /// What to save for `state`, if anything.  `force` skips the throttle.
    pub fn record(&mut self, state: &Payload, now: Instant, force: bool) -> Option<SavedPosition> {
        let video_id = text(state, "videoId")?;
        let current_time = number(state, "currentTime");
        if current_time == 0.0 {
            return None;
        }
        if !force {
            if let Some(last) = self.last_save {
                if now.duration_since(last) < SAVE_INTERVAL {
                    return None;
                }
            }
        }
        self.last_save = Some(now);

        let duration = number(state, "duration");
        if duration > 0.0
            && (current_time > duration - END_MARGIN || current_time / duration > END_FRACTION)
        {
            return Some(SavedPosition {
                video_id,
                position: 0.0,
                title: None,
                channel: None,
                thumbnail: None,
                duration_secs: 0,
                duration_label: String::new(),
            });
        }
        if current_time <= MIN_POSITION {
            return None;
        }

        let duration_secs = if duration > 0.0 { duration as u64 } else { 0 };
        Some(SavedPosition {
            video_id,
            position: (current_time * 10.0).round() / 10.0,
            title: text(state, "title"),
            channel: text(state, "channel"),
            thumbnail: text(state, "thumbnail"),
            duration_secs,
            duration_label: duration_label(duration_secs),
        })
    }
}

/// Non-empty string field of `state`.
pub fn text(state: &Payload, key: &str) -> Option<String> {
    state
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(state: &Payload, key: &str) -> f64 {
    state.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn duration_label(secs: u64) -> String {
    if secs == 0 {
        return String::new();
    }
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(video: &str, at: f64, duration: f64) -> Payload {
        json!({
            "videoId": video,
            "title": "Title",
            "currentTime": at,
            "duration": duration,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn saves_at_most_once_per_interval() {
        let mut tracker = PositionTracker::default();
        let start = Instant::now();

        let first = tracker.record(&state("abc123", 60.04, 600.0), start, false).unwrap();
        assert_eq!(first.position, 60.0);
        assert_eq!(first.title.as_deref(), Some("Title"));
        assert_eq!(first.duration_label, "10:00");

        let soon = start + Duration::from_secs(2);
        assert_eq!(tracker.record(&state("abc123", 62.0, 600.0), soon, false), None);

        let later = start + SAVE_INTERVAL;
        let saved = tracker.record(&state("abc123", 65.0, 600.0), later, false).unwrap();
        assert_eq!(saved.position, 65.0);
    }

    #[test]
    fn force_skips_the_throttle() {
        let mut tracker = PositionTracker::default();
        let now = Instant::now();
        assert!(tracker.record(&state("abc123", 60.0, 600.0), now, false).is_some());
        let flushed = tracker.record(&state("abc123", 61.0, 600.0), now, true).unwrap();
        assert_eq!(flushed.position, 61.0);
    }

    #[test]
    fn near_end_clears_the_position() {
        let mut tracker = PositionTracker::default();
        let now = Instant::now();

        let cleared = tracker.record(&state("abc123", 580.0, 600.0), now, true).unwrap();
        assert_eq!(cleared.position, 0.0);

        // 96% of a short clip is past the end even inside the 30s margin rule.
        let short = tracker.record(&state("short", 48.0, 50.0), now, true).unwrap();
        assert_eq!(short.position, 0.0);
    }

    #[test]
    fn early_or_empty_states_save_nothing() {
        let mut tracker = PositionTracker::default();
        let now = Instant::now();
        assert_eq!(tracker.record(&state("abc123", 4.0, 600.0), now, true), None);
        assert_eq!(tracker.record(&state("abc123", 0.0, 600.0), now, true), None);

        let no_video = json!({"currentTime": 90.0}).as_object().unwrap().clone();
        assert_eq!(tracker.record(&no_video, now, true), None);

        // Unknown duration: saved, no label.
        let live = tracker.record(&state("live", 90.0, 0.0), now, true).unwrap();
        assert_eq!(live.duration_label, "");
        assert_eq!(live.duration_secs, 0);
    }

    #[test]
    fn labels_hours() {
        assert_eq!(duration_label(3725), "1:02:05");
        assert_eq!(duration_label(65), "1:05");
    }

    #[test]
    fn memory_store_keeps_latest_per_video() {
        let store = MemoryPositions::default();
        let mut tracker = PositionTracker::default();
        let now = Instant::now();
        for at in [30.0, 40.0] {
            let saved = tracker.record(&state("abc123", at, 600.0), now, true).unwrap();
            store.save_position(1, saved);
        }
        assert_eq!(store.get(1, "abc123").unwrap().position, 40.0);
        assert_eq!(store.get(2, "abc123"), None);
    }
}
