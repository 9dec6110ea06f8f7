//! The one capability the tracker needs from whichever player renders a lesson.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    /// A `<video>` element: reports time updates, seeks, pauses and ends by itself.
    Native,
    /// An embedded YouTube player: only reports state changes, time has to be polled.
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Unstarted,
    Playing,
    Paused,
    Buffering,
    Ended,
    Cued,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    TimeUpdate(f64),
    Seeked(f64),
    StateChanged(PlaybackState),
}

pub trait ActivePlayer: Send + Sync {
    fn kind(&self) -> PlayerKind;

    /// Current playback time in (fractional) seconds.
    fn current_time(&self) -> f64;

    /// Total length, once the player knows it.
    fn duration(&self) -> Option<f64>;

    /// Seed the offset playback starts from.
    fn start_at(&self, second: u64);

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// A player driven by hand, used by the replay binary and in tests.
#[derive(Debug)]
pub struct ManualPlayer {
    kind: PlayerKind,
    time: Mutex<f64>,
    duration: Mutex<Option<f64>>,
    started_at: Mutex<Option<u64>>,
    events: broadcast::Sender<PlayerEvent>,
}

impl ManualPlayer {
    pub fn new(kind: PlayerKind) -> Self {
        let (events, _) = broadcast::channel(64);

        Self {
            kind,
            time: Mutex::new(0.0),
            duration: Mutex::new(None),
            started_at: Mutex::new(None),
            events,
        }
    }

    pub fn with_duration(self, duration: f64) -> Self {
        *lock(&self.duration) = Some(duration);
        self
    }

    /// Offset the tracker asked playback to start from.
    pub fn started_at(&self) -> Option<u64> {
        *lock(&self.started_at)
    }

    /// Number of live subscriptions, zero once every binding released the player.
    pub fn listeners(&self) -> usize {
        self.events.receiver_count()
    }

    /// Move the playhead silently, the way time advances between embedded polls.
    pub fn set_time(&self, time: f64) {
        *lock(&self.time) = time;
    }

    pub fn time_update(&self, time: f64) {
        self.set_time(time);
        self.emit(PlayerEvent::TimeUpdate(time));
    }

    pub fn seek(&self, time: f64) {
        self.set_time(time);
        self.emit(PlayerEvent::Seeked(time));
    }

    pub fn set_state(&self, state: PlaybackState) {
        if state == PlaybackState::Ended {
            if let Some(duration) = *lock(&self.duration) {
                self.set_time(duration);
            }
        }

        self.emit(PlayerEvent::StateChanged(state));
    }

    fn emit(&self, event: PlayerEvent) {
        // nobody bound yet
        let _ = self.events.send(event);
    }
}

impl ActivePlayer for ManualPlayer {
    fn kind(&self) -> PlayerKind {
        self.kind
    }

    fn current_time(&self) -> f64 {
        *lock(&self.time)
    }

    fn duration(&self) -> Option<f64> {
        *lock(&self.duration)
    }

    fn start_at(&self, second: u64) {
        *lock(&self.started_at) = Some(second);
        self.set_time(second as f64);
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let player = ManualPlayer::new(PlayerKind::Native).with_duration(90.0);
        let mut events = player.subscribe();

        player.time_update(3.2);
        player.seek(40.0);
        player.set_state(PlaybackState::Ended);

        assert_eq!(events.recv().await.unwrap(), PlayerEvent::TimeUpdate(3.2));
        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Seeked(40.0));
        assert_eq!(
            events.recv().await.unwrap(),
            PlayerEvent::StateChanged(PlaybackState::Ended)
        );
        assert_eq!(player.current_time(), 90.0);
    }

    #[test]
    fn start_offset_moves_the_playhead() {
        let player = ManualPlayer::new(PlayerKind::Embedded);
        player.start_at(55);

        assert_eq!(player.started_at(), Some(55));
        assert_eq!(player.current_time(), 55.0);
        assert_eq!(player.listeners(), 0);
    }
}
