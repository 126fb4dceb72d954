//! Target side: run relayed commands against a local playback engine and
//! decide when the engine's state goes back out.
//!
//! Discrete engine events (`play`, `pause`, `seeked`, `ended`) are reported
//! at once.  Progress (`timeupdate`) is rate limited by [`StateThrottle`].

use std::time::{Duration, Instant};

use remote_proto::protocol::{Command, PlayState};
use tracing::{debug, info};

/// What a playback engine must offer to be remote controlled.
pub trait PlaybackEngine {
    /// Load and start `video`, beginning at `start_time` seconds.
    fn load(&mut self, video: &QueueItem, start_time: f64);
    fn pause(&mut self);
    fn resume(&mut self);
    fn seek(&mut self, time: f64);
    fn set_volume(&mut self, level: f64);
    /// Length of the loaded video; 0 when unknown.
    fn duration(&self) -> f64;
    fn snapshot(&self) -> PlayState;
    /// Events the engine raised since the last call.
    fn drain_events(&mut self) -> Vec<EngineEvent>;
    /// Wall time passed.  Only engines without their own clock care.
    fn tick(&mut self, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Play,
    Pause,
    Seeked,
    Ended,
    TimeUpdate,
}

impl EngineEvent {
    pub fn is_discrete(self) -> bool {
        !matches!(self, EngineEvent::TimeUpdate)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueItem {
    pub video_id: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
}

impl QueueItem {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            ..Self::default()
        }
    }
}

/// Local play queue.  Moves never wrap.
#[derive(Debug, Clone)]
pub struct Queue {
    items: Vec<QueueItem>,
    index: usize,
}

impl Queue {
    pub fn new(items: Vec<QueueItem>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Self { items, index: 0 })
        }
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Step by `delta`; `None` at either end.
    pub fn step(&mut self, delta: isize) -> Option<&QueueItem> {
        let next = self.index.checked_add_signed(delta)?;
        if next >= self.items.len() {
            return None;
        }
        self.index = next;
        self.items.get(next)
    }
}

// ── StateThrottle ─────────────────────────────────────────────────────────────

/// Gate for outgoing snapshots.  Takes `now` from the caller.
#[derive(Debug, Clone)]
pub struct StateThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl StateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn admit(&mut self, event: EngineEvent, now: Instant) -> bool {
        let due = match self.last_sent {
            _ if event.is_discrete() => true,
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_sent = Some(now);
        }
        due
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

pub struct Executor<E: PlaybackEngine> {
    engine: E,
    queue: Option<Queue>,
    throttle: StateThrottle,
}

impl<E: PlaybackEngine> Executor<E> {
    pub fn new(engine: E, state_interval: Duration) -> Self {
        Self {
            engine,
            queue: None,
            throttle: StateThrottle::new(state_interval),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn set_queue(&mut self, items: Vec<QueueItem>) {
        self.queue = Queue::new(items);
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    pub fn execute(&mut self, command: Command) {
        debug!("executing {}", command.action());
        match command {
            Command::Play {
                video_id,
                title,
                channel,
                duration,
                start_time,
                playlist_id,
            } => {
                if let Some(playlist) = playlist_id {
                    debug!("play from playlist {}", playlist);
                }
                let item = QueueItem {
                    video_id,
                    title,
                    channel,
                    duration,
                };
                info!("loading {}", item.video_id);
                self.engine.load(&item, start_time.unwrap_or(0.0).max(0.0));
            }
            Command::Pause => self.engine.pause(),
            Command::Resume => self.engine.resume(),
            Command::Seek { time } => {
                let duration = self.engine.duration();
                let time = if duration > 0.0 {
                    time.clamp(0.0, duration)
                } else {
                    time.max(0.0)
                };
                self.engine.seek(time);
            }
            Command::Volume { level } => self.engine.set_volume(level.clamp(0.0, 1.0)),
            Command::QueueNext => self.step_queue(1),
            Command::QueuePrev => self.step_queue(-1),
        }
    }

    fn step_queue(&mut self, delta: isize) {
        let Some(queue) = self.queue.as_mut() else {
            debug!("no active queue");
            return;
        };
        match queue.step(delta) {
            Some(item) => {
                let item = item.clone();
                info!("queue -> {}", item.video_id);
                self.engine.load(&item, 0.0);
            }
            None => debug!("queue at its end, ignoring step {}", delta),
        }
    }

    /// Drain engine events and return the snapshot to publish, if any.
    pub fn pump(&mut self, now: Instant) -> Option<PlayState> {
        let mut publish = false;
        for event in self.engine.drain_events() {
            if self.throttle.admit(event, now) {
                publish = true;
            }
        }
        publish.then(|| self.engine.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls; events are queued by the test.
    #[derive(Default)]
    struct FakeEngine {
        state: PlayState,
        loaded: Vec<(String, f64)>,
        events: Vec<EngineEvent>,
    }

    impl PlaybackEngine for FakeEngine {
        fn load(&mut self, video: &QueueItem, start_time: f64) {
            self.loaded.push((video.video_id.clone(), start_time));
            self.state.video_id = Some(video.video_id.clone());
            self.state.duration = video.duration.unwrap_or(120.0);
            self.state.current_time = start_time;
            self.state.paused = false;
        }
        fn pause(&mut self) {
            self.state.paused = true;
        }
        fn resume(&mut self) {
            self.state.paused = false;
        }
        fn seek(&mut self, time: f64) {
            self.state.current_time = time;
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
    }

    fn executor() -> Executor<FakeEngine> {
        Executor::new(FakeEngine::default(), Duration::from_millis(1000))
    }

    #[test]
    fn seek_and_volume_clamp() {
        let mut ex = executor();
        ex.execute(Command::play("abc123"));
        ex.execute(Command::Seek { time: 500.0 });
        assert_eq!(ex.engine().state.current_time, 120.0);
        ex.execute(Command::Seek { time: -3.0 });
        assert_eq!(ex.engine().state.current_time, 0.0);
        ex.execute(Command::Seek { time: 42.0 });
        assert_eq!(ex.engine().state.current_time, 42.0);

        ex.execute(Command::Volume { level: 1.7 });
        assert_eq!(ex.engine().state.volume, 1.0);
        ex.execute(Command::Volume { level: -0.2 });
        assert_eq!(ex.engine().state.volume, 0.0);
    }

    #[test]
    fn play_honours_start_time() {
        let mut ex = executor();
        ex.execute(Command::Play {
            video_id: "abc123".into(),
            title: None,
            channel: None,
            duration: Some(300.0),
            start_time: Some(73.0),
            playlist_id: None,
        });
        assert_eq!(ex.engine().loaded, vec![("abc123".to_string(), 73.0)]);
    }

    #[test]
    fn queue_moves_without_wrapping() {
        let mut ex = executor();
        ex.execute(Command::QueueNext);
        assert!(ex.engine().loaded.is_empty());

        ex.set_queue(vec![QueueItem::new("a"), QueueItem::new("b")]);
        ex.execute(Command::QueuePrev);
        ex.execute(Command::QueueNext);
        ex.execute(Command::QueueNext);
        let loaded: Vec<_> = ex.engine().loaded.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(loaded, vec!["b"]);
        assert_eq!(ex.queue().unwrap().index(), 1);

        ex.execute(Command::QueuePrev);
        assert_eq!(ex.engine().loaded.last().unwrap().0, "a");
    }

    #[test]
    fn discrete_events_publish_immediately() {
        let mut ex = executor();
        let t0 = Instant::now();
        ex.engine_mut().events = vec![EngineEvent::TimeUpdate];
        assert!(ex.pump(t0).is_some());

        ex.engine_mut().events = vec![EngineEvent::Pause];
        assert!(ex.pump(t0 + Duration::from_millis(10)).is_some());
        ex.engine_mut().events = vec![EngineEvent::Seeked];
        assert!(ex.pump(t0 + Duration::from_millis(20)).is_some());
    }

    #[test]
    fn progress_is_throttled() {
        let mut throttle = StateThrottle::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        assert!(throttle.admit(EngineEvent::TimeUpdate, t0));
        assert!(!throttle.admit(EngineEvent::TimeUpdate, t0 + Duration::from_millis(250)));
        assert!(!throttle.admit(EngineEvent::TimeUpdate, t0 + Duration::from_millis(999)));
        assert!(throttle.admit(EngineEvent::TimeUpdate, t0 + Duration::from_millis(1000)));

        // A discrete event restarts the window.
        assert!(throttle.admit(EngineEvent::Play, t0 + Duration::from_millis(1100)));
        assert!(!throttle.admit(EngineEvent::TimeUpdate, t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn nothing_to_publish_without_events() {
        let mut ex = executor();
        assert!(ex.pump(Instant::now()).is_none());
    }
}
