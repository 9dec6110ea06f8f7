//! Keeps the server (and a local cache) informed of how far into a lesson the learner is.
//!
//! A [ProgressTracker] binds one player at a time. Binding resolves where to resume from,
//! seeds the player with it and spawns two tasks: a [ThrottledSink] worker that sends positions,
//! and an event loop that turns player events into samples and immediate commits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snafu::{ensure, Location, Snafu};
use tokio::sync::watch;
use tracing::instrument;

pub use cache::{cache_key, CacheError, FileCache, MemoryCache, PositionCache};

use self::binding::Binding;
use crate::model::{resolve_resume, ContentDescriptor, ContentId, PlaybackPosition, ResumePoint};
use crate::player::{ActivePlayer, PlayerKind};
use crate::sink::{Commit, ThrottledSink};
use crate::time::Clock;
use crate::transport::{ProgressApi, TransportError};

mod binding;
mod cache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSettings {
    /// How long a window collects samples before its latest value is sent.
    pub window: Duration,
    /// A sample further than this from the previous one is committed right away.
    pub jump_threshold: Duration,
    /// How often an embedded player is asked for its time while playing.
    pub poll_interval: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(4000),
            jump_threshold: Duration::from_millis(1500),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Pause,
    End,
    Hidden,
    Unload,
    Navigation,
    Unbind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Idle,
    Bound,
    Resuming,
    Tracking,
    /// Left by the next sample, which returns to [TrackerPhase::Tracking].
    Flushed(FlushReason),
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TrackerError {
    #[snafu(display(
        "content {content} needs a {expected:?} player but a {actual:?} player was given"
    ))]
    PlayerMismatch {
        content: ContentId,
        expected: PlayerKind,
        actual: PlayerKind,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Sends a committed second to the server, then records it in the local cache.
struct PositionCommitter {
    content: ContentId,
    api: Arc<dyn ProgressApi>,
    cache: Arc<dyn PositionCache>,
    clock: Clock,
}

#[async_trait]
impl Commit for PositionCommitter {
    type Error = TransportError;

    async fn commit(&self, second: u64) -> Result<(), TransportError> {
        self.api.send_position(self.content, second).await?;

        let position = PlaybackPosition::new(second, self.clock.now_millis());
        self.cache.store(self.content, position);
        Ok(())
    }
}

pub struct ProgressTracker {
    api: Arc<dyn ProgressApi>,
    cache: Arc<dyn PositionCache>,
    settings: ProgressSettings,
    clock: Clock,
    phase: Arc<watch::Sender<TrackerPhase>>,
    binding: Option<Binding>,
}

impl ProgressTracker {
    pub fn new(
        api: Arc<dyn ProgressApi>,
        cache: Arc<dyn PositionCache>,
        settings: ProgressSettings,
    ) -> Self {
        let (phase, _) = watch::channel(TrackerPhase::Idle);

        Self {
            api,
            cache,
            settings,
            clock: Clock::default(),
            phase: Arc::new(phase),
            binding: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> TrackerPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<TrackerPhase> {
        self.phase.subscribe()
    }

    pub fn bound_content(&self) -> Option<ContentId> {
        self.binding.as_ref().map(|binding| binding.content)
    }

    /// Bind `player` to `content`, releasing whatever was bound before.
    ///
    /// Returns the position playback was seeded with. A non-zero resume position is sent to the
    /// server again so the remote copy catches up with a newer local one.
    #[instrument(skip_all, fields(content = %content.id))]
    pub async fn bind(
        &mut self,
        content: &ContentDescriptor,
        player: Arc<dyn ActivePlayer>,
    ) -> Result<ResumePoint, TrackerError> {
        let expected = content.content_type.player_kind();
        ensure!(
            player.kind() == expected,
            PlayerMismatchSnafu {
                content: content.id,
                expected,
                actual: player.kind(),
            }
        );

        self.unbind().await;
        self.phase.send_replace(TrackerPhase::Bound);

        self.phase.send_replace(TrackerPhase::Resuming);
        let local = self.cache.load(content.id);
        let resume = resolve_resume(content.last_view.as_ref(), local.as_ref());
        tracing::info!(second = resume.second, source = ?resume.source, "resuming playback");

        player.start_at(resume.second);

        let committer = PositionCommitter {
            content: content.id,
            api: self.api.clone(),
            cache: self.cache.clone(),
            clock: self.clock,
        };
        let sink = ThrottledSink::spawn(self.settings.window, committer);
        if resume.second > 0 {
            sink.commit_now(resume.second as f64);
        }

        self.binding = Some(Binding::spawn(
            content.id,
            player,
            sink,
            self.settings,
            self.phase.clone(),
            resume.second as f64,
        ));
        self.phase.send_replace(TrackerPhase::Tracking);

        Ok(resume)
    }

    /// Commit the bound player's current time now. Does nothing while idle.
    pub fn flush(&self, reason: FlushReason) {
        match &self.binding {
            Some(binding) => binding.flush(reason),
            None => tracing::debug!(?reason, "nothing bound, skipping flush"),
        }
    }

    /// Flush, stop the player's tasks and release it. Safe to call while idle.
    pub async fn unbind(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.flush(FlushReason::Unbind);
            binding.shutdown().await;
        }

        self.phase.send_replace(TrackerPhase::Idle);
    }
}
