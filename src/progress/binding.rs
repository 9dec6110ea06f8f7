use std::sync::Arc;

use futures::Future;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Interval;

use super::{FlushReason, ProgressSettings, TrackerPhase};
use crate::model::ContentId;
use crate::player::{ActivePlayer, PlaybackState, PlayerEvent, PlayerKind};
use crate::sink::{SinkHandle, ThrottledSink};
use crate::time::poll_timer;

type QuitSignal = oneshot::Receiver<Quit>;

#[derive(Debug, Clone, Copy)]
struct Quit;

/// One player bound to one content item: the event loop task plus the sink it feeds.
pub(super) struct Binding {
    pub(super) content: ContentId,
    player: Arc<dyn ActivePlayer>,
    sink: ThrottledSink,
    phase: Arc<watch::Sender<TrackerPhase>>,
    quit: oneshot::Sender<Quit>,
    task: tokio::task::JoinHandle<()>,
}

impl Binding {
    pub(super) fn spawn(
        content: ContentId,
        player: Arc<dyn ActivePlayer>,
        sink: ThrottledSink,
        settings: ProgressSettings,
        phase: Arc<watch::Sender<TrackerPhase>>,
        resumed_at: f64,
    ) -> Self {
        let event_loop = EventLoop {
            content,
            player: player.clone(),
            sink: sink.handle(),
            phase: phase.clone(),
            settings,
            last_observed: Some(resumed_at),
            poll: None,
        };

        // subscribed before the task first runs, events emitted right after bind are kept
        let receiver = player.subscribe();
        let (quit, task) = spawn_with_quit(|signal| event_loop.run(receiver, signal));

        Self {
            content,
            player,
            sink,
            phase,
            quit,
            task,
        }
    }

    /// Commit the player's current time right away, bypassing the window.
    pub(super) fn flush(&self, reason: FlushReason) {
        let time = self.player.current_time();
        tracing::debug!(content = %self.content, ?reason, time, "flushing position");

        self.sink.commit_now(time);
        self.phase.send_replace(TrackerPhase::Flushed(reason));
    }

    /// Stop the event loop, release the player and wait for queued commits to go out.
    pub(super) async fn shutdown(self) {
        let Self {
            content,
            player,
            sink,
            quit,
            task,
            ..
        } = self;

        let _ = quit.send(Quit);
        if let Err(error) = task.await {
            tracing::error!(%content, %error, "player event loop crashed");
        }

        drop(player);
        sink.close().await;
        tracing::debug!(%content, "binding released");
    }
}

fn spawn_with_quit<F>(
    f: impl FnOnce(QuitSignal) -> F,
) -> (oneshot::Sender<Quit>, tokio::task::JoinHandle<()>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(f(rx));
    (tx, handle)
}

struct EventLoop {
    content: ContentId,
    player: Arc<dyn ActivePlayer>,
    sink: SinkHandle,
    phase: Arc<watch::Sender<TrackerPhase>>,
    settings: ProgressSettings,
    last_observed: Option<f64>,
    poll: Option<Interval>,
}

impl EventLoop {
    async fn run(mut self, mut events: broadcast::Receiver<PlayerEvent>, mut quit: QuitSignal) {
        let content = self.content;

        loop {
            tokio::select! {
                _ = &mut quit => break,

                event = events.recv() => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%content, skipped, "player events were dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!(%content, "player went away");
                        break;
                    }
                },

                _ = tick(&mut self.poll) => {
                    let time = self.player.current_time();
                    self.sample(time);
                }
            }
        }
    }

    fn on_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::TimeUpdate(time) => self.sample(time),
            PlayerEvent::Seeked(time) => {
                self.last_observed = Some(time);
                self.sink.commit_now(time);
                self.enter_tracking();
            }
            PlayerEvent::StateChanged(state) => self.on_state(state),
        }
    }

    fn on_state(&mut self, state: PlaybackState) {
        tracing::debug!(content = %self.content, ?state, "player state changed");

        if state != PlaybackState::Playing {
            self.poll = None;
        }

        match state {
            PlaybackState::Playing => {
                if self.player.kind() == PlayerKind::Embedded && self.poll.is_none() {
                    self.poll = Some(poll_timer(self.settings.poll_interval));
                }
                self.enter_tracking();
            }
            PlaybackState::Paused => {
                let time = self.player.current_time();
                self.last_observed = Some(time);
                self.sink.commit_now(time);
                self.phase.send_replace(TrackerPhase::Flushed(FlushReason::Pause));
            }
            PlaybackState::Ended => {
                let time = match self.player.kind() {
                    PlayerKind::Native => self.player.current_time(),
                    PlayerKind::Embedded => self
                        .player
                        .duration()
                        .or(self.last_observed)
                        .unwrap_or_else(|| self.player.current_time()),
                };
                self.last_observed = Some(time);
                self.sink.commit_now(time);
                self.phase.send_replace(TrackerPhase::Flushed(FlushReason::End));
            }
            PlaybackState::Buffering | PlaybackState::Unstarted | PlaybackState::Cued => {}
        }
    }

    /// A regular sample: windowed, unless it jumped far enough from the previous one.
    fn sample(&mut self, time: f64) {
        let threshold = self.settings.jump_threshold.as_secs_f64();
        let jumped = self
            .last_observed
            .map_or(false, |last| (time - last).abs() > threshold);
        self.last_observed = Some(time);

        if jumped {
            tracing::debug!(content = %self.content, time, "position jumped, committing now");
            self.sink.commit_now(time);
        } else {
            self.sink.accept(time);
        }

        self.enter_tracking();
    }

    fn enter_tracking(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == TrackerPhase::Tracking {
                false
            } else {
                *phase = TrackerPhase::Tracking;
                true
            }
        });
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}
