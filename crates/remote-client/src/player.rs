//! Clock-driven stand-in for a real player, used by `remote target`.
//!
//! Position advances with `advance`, which raises `TimeUpdate` and, when the
//! end is reached, `Ended`.

use std::time::Duration;

use remote_proto::protocol::PlayState;

use crate::target::{EngineEvent, PlaybackEngine, QueueItem};

/// Duration assumed for videos loaded without one.
pub const DEFAULT_DURATION: f64 = 240.0;

#[derive(Debug, Default)]
pub struct SimulatedPlayer {
    state: PlayState,
    events: Vec<EngineEvent>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PlayState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.video_id.is_some() && !self.state.paused && !self.state.ended
    }

    /// Let `elapsed` of wall time pass.
    pub fn advance(&mut self, elapsed: Duration) {
        if !self.is_playing() {
            return;
        }
        let next = self.state.current_time + elapsed.as_secs_f64();
        if next >= self.state.duration {
            self.state.current_time = self.state.duration;
            self.state.paused = true;
            self.state.ended = true;
            self.events.push(EngineEvent::Ended);
        } else {
            self.state.current_time = next;
            self.events.push(EngineEvent::TimeUpdate);
        }
    }
}

impl PlaybackEngine for SimulatedPlayer {
    fn load(&mut self, video: &QueueItem, start_time: f64) {
        let duration = video.duration.filter(|d| *d > 0.0).unwrap_or(DEFAULT_DURATION);
        self.state = PlayState {
            video_id: Some(video.video_id.clone()),
            title: video.title.clone(),
            channel: video.channel.clone(),
            thumbnail: Some(format!(
                "https://i.ytimg.com/vi/{}/hqdefault.jpg",
                video.video_id
            )),
            current_time: start_time.min(duration),
            duration,
            paused: false,
            volume: self.state.volume,
            ended: false,
            extra: Default::default(),
        };
        self.events.push(EngineEvent::Play);
    }

    fn pause(&mut self) {
        if self.state.video_id.is_some() && !self.state.paused {
            self.state.paused = true;
            self.events.push(EngineEvent::Pause);
        }
    }

    fn resume(&mut self) {
        if self.state.video_id.is_none() || !self.state.paused {
            return;
        }
        if self.state.ended {
            self.state.current_time = 0.0;
            self.state.ended = false;
        }
        self.state.paused = false;
        self.events.push(EngineEvent::Play);
    }

    fn seek(&mut self, time: f64) {
        if self.state.video_id.is_none() {
            return;
        }
        self.state.current_time = time;
        self.state.ended = false;
        self.events.push(EngineEvent::Seeked);
    }

    fn set_volume(&mut self, level: f64) {
        self.state.volume = level;
    }

    fn duration(&self) -> f64 {
        self.state.duration
    }

    fn snapshot(&self) -> PlayState {
        self.state.clone()
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn tick(&mut self, elapsed: Duration) {
        self.advance(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_to_the_end() {
        let mut player = SimulatedPlayer::new();
        player.load(
            &QueueItem {
                duration: Some(2.0),
                ..QueueItem::new("abc123")
            },
            0.0,
        );
        assert_eq!(player.drain_events(), vec![EngineEvent::Play]);

        player.advance(Duration::from_millis(1500));
        assert_eq!(player.drain_events(), vec![EngineEvent::TimeUpdate]);
        assert!((player.state().current_time - 1.5).abs() < 1e-9);

        player.advance(Duration::from_secs(1));
        assert_eq!(player.drain_events(), vec![EngineEvent::Ended]);
        assert!(player.state().ended);
        assert!(!player.is_playing());

        player.resume();
        assert_eq!(player.state().current_time, 0.0);
        assert!(player.is_playing());
    }

    #[test]
    fn pause_stops_the_clock() {
        let mut player = SimulatedPlayer::new();
        player.load(&QueueItem::new("abc123"), 10.0);
        assert_eq!(player.state().duration, DEFAULT_DURATION);
        player.pause();
        player.pause();
        player.advance(Duration::from_secs(5));
        assert_eq!(
            player.drain_events(),
            vec![EngineEvent::Play, EngineEvent::Pause]
        );
        assert_eq!(player.state().current_time, 10.0);
    }

    #[test]
    fn idle_player_ignores_transport_commands() {
        let mut player = SimulatedPlayer::new();
        player.seek(5.0);
        player.resume();
        player.pause();
        assert!(player.drain_events().is_empty());
        // Volume before any video still sticks.
        player.set_volume(0.3);
        player.load(&QueueItem::new("abc123"), 0.0);
        assert_eq!(player.state().volume, 0.3);
    }
}
