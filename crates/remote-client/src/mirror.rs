//! Controller-side mirror of the target's play state.
//!
//! The hub only ever relays snapshots, so the controller keeps its own copy
//! and renders from it.  Two things make that copy more than a cache:
//!
//! ```text
//!  Stale   — built from the hub's cached snapshot (or nothing) at pairing
//!            time; the target may have restarted since.  Render as
//!            "last known".
//!  Live    — at least one `state` frame arrived over this link.
//! ```
//!
//! Commands are applied optimistically as soon as they are issued and the
//! next authoritative snapshot overwrites them.  While the user drags the
//! seek control, `currentTime` stays under local authority until release.

use remote_proto::protocol::{Command, PlayState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Stale,
    Live,
}

#[derive(Debug, Clone)]
pub struct PlayMirror {
    state: PlayState,
    freshness: Freshness,
    /// Seek position held by an in-progress drag.
    drag: Option<f64>,
}

impl PlayMirror {
    /// Mirror created on `paired`.  Always starts stale, even with a cached
    /// snapshot.
    pub fn new(initial: Option<PlayState>) -> Self {
        Self {
            state: initial.unwrap_or_default(),
            freshness: Freshness::Stale,
            drag: None,
        }
    }

    pub fn state(&self) -> &PlayState {
        &self.state
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_live(&self) -> bool {
        self.freshness == Freshness::Live
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Position to render: the drag position while dragging.
    pub fn display_time(&self) -> f64 {
        self.drag.unwrap_or(self.state.current_time)
    }

    /// The link to the target is in doubt again (socket reconnect).
    pub fn mark_stale(&mut self) {
        self.freshness = Freshness::Stale;
    }

    /// Authoritative snapshot from the target.
    pub fn apply_remote(&mut self, state: PlayState) {
        self.state = state;
        self.freshness = Freshness::Live;
    }

    /// Optimistic local update for a command that was just sent.
    pub fn apply_optimistic(&mut self, command: &Command) {
        match command {
            Command::Play {
                video_id,
                title,
                channel,
                duration,
                start_time,
                ..
            } => {
                self.state.video_id = Some(video_id.clone());
                self.state.title = title.clone();
                self.state.channel = channel.clone();
                self.state.thumbnail = None;
                self.state.duration = duration.unwrap_or(0.0);
                self.state.current_time = start_time.unwrap_or(0.0);
                self.state.paused = false;
                self.state.ended = false;
            }
            Command::Pause => self.state.paused = true,
            Command::Resume => {
                self.state.paused = false;
                self.state.ended = false;
            }
            Command::Seek { time } => self.state.current_time = self.clamp_time(*time),
            Command::Volume { level } => self.state.volume = level.clamp(0.0, 1.0),
            // Queue position lives on the target; wait for its snapshot.
            Command::QueueNext | Command::QueuePrev => {}
        }
    }

    pub fn begin_drag(&mut self) {
        self.drag = Some(self.state.current_time);
    }

    pub fn drag_to(&mut self, time: f64) {
        if self.drag.is_some() {
            self.drag = Some(self.clamp_time(time));
        }
    }

    /// End the drag.  Returns the position to seek to.
    pub fn end_drag(&mut self) -> Option<f64> {
        self.drag.take()
    }

    fn clamp_time(&self, time: f64) -> f64 {
        if self.state.duration > 0.0 {
            time.clamp(0.0, self.state.duration)
        } else {
            time.max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(time: f64, paused: bool) -> PlayState {
        PlayState {
            video_id: Some("abc123".into()),
            current_time: time,
            duration: 120.0,
            paused,
            ..PlayState::default()
        }
    }

    #[test]
    fn cached_snapshot_starts_stale() {
        let mirror = PlayMirror::new(Some(snapshot(10.0, false)));
        assert_eq!(mirror.freshness(), Freshness::Stale);
        assert_eq!(mirror.state().current_time, 10.0);

        let empty = PlayMirror::new(None);
        assert!(!empty.is_live());
        assert!(empty.state().video_id.is_none());
    }

    #[test]
    fn remote_snapshot_makes_it_live() {
        let mut mirror = PlayMirror::new(None);
        mirror.apply_remote(snapshot(3.0, false));
        assert!(mirror.is_live());

        mirror.mark_stale();
        assert_eq!(mirror.freshness(), Freshness::Stale);
        assert_eq!(mirror.state().current_time, 3.0);
    }

    #[test]
    fn optimistic_update_is_overwritten_by_next_snapshot() {
        let mut mirror = PlayMirror::new(Some(snapshot(10.0, false)));
        mirror.apply_optimistic(&Command::Pause);
        assert!(mirror.state().paused);

        // Target never honoured the pause.
        mirror.apply_remote(snapshot(11.0, false));
        assert!(!mirror.state().paused);
    }

    #[test]
    fn optimistic_play_and_clamps() {
        let mut mirror = PlayMirror::new(None);
        mirror.apply_optimistic(&Command::Play {
            video_id: "xyz".into(),
            title: Some("Song".into()),
            channel: None,
            duration: Some(60.0),
            start_time: Some(5.0),
            playlist_id: None,
        });
        assert_eq!(mirror.state().video_id.as_deref(), Some("xyz"));
        assert_eq!(mirror.state().current_time, 5.0);
        assert!(!mirror.state().paused);

        mirror.apply_optimistic(&Command::Seek { time: 500.0 });
        assert_eq!(mirror.state().current_time, 60.0);
        mirror.apply_optimistic(&Command::Volume { level: -2.0 });
        assert_eq!(mirror.state().volume, 0.0);
    }

    #[test]
    fn drag_holds_position_against_snapshots() {
        let mut mirror = PlayMirror::new(Some(snapshot(10.0, false)));
        mirror.begin_drag();
        mirror.drag_to(80.0);

        mirror.apply_remote(snapshot(11.0, false));
        assert_eq!(mirror.display_time(), 80.0);
        assert_eq!(mirror.state().current_time, 11.0);

        assert_eq!(mirror.end_drag(), Some(80.0));
        assert_eq!(mirror.display_time(), 11.0);
        assert_eq!(mirror.end_drag(), None);
    }

    #[test]
    fn drag_to_without_begin_is_ignored() {
        let mut mirror = PlayMirror::new(Some(snapshot(10.0, false)));
        mirror.drag_to(50.0);
        assert!(!mirror.is_dragging());
        assert_eq!(mirror.display_time(), 10.0);
    }
}
