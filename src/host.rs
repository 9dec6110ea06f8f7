//! The lesson view: route parameters and page lifecycle events in, engine calls out.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use snafu::{ensure, Location, ResultExt, Snafu};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::assessment::{AssessmentError, AttemptCoordinator, CompletionSignal};
use crate::model::{ChapterId, ContentDescriptor, ContentId, CourseId, ResumePoint};
use crate::player::ActivePlayer;
use crate::progress::{FlushReason, ProgressTracker, TrackerError};
use crate::reactions::Reactions;
use crate::transport::ProgressApi;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HostError {
    #[snafu(display("route points at content {expected} but lesson {actual} was delivered"))]
    RouteMismatch {
        expected: ContentId,
        actual: ContentId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not bind the lesson's player: {source}"))]
    BindPlayer {
        source: TrackerError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not load the chapter's test: {source}"))]
    LoadChapter {
        source: AssessmentError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteParams {
    pub course: CourseId,
    pub chapter: ChapterId,
    pub content: ContentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

pub struct LessonHost {
    tracker: ProgressTracker,
    coordinator: AttemptCoordinator,
    progress_api: Arc<dyn ProgressApi>,
    route: Option<RouteParams>,
    reactions: Option<Reactions>,
}

impl LessonHost {
    pub fn new(
        tracker: ProgressTracker,
        coordinator: AttemptCoordinator,
        progress_api: Arc<dyn ProgressApi>,
    ) -> Self {
        Self {
            tracker,
            coordinator,
            progress_api,
            route: None,
            reactions: None,
        }
    }

    /// Enter `route`: bind `player` to the lesson, and load the chapter's test when the chapter
    /// differs from the one already loaded.
    #[instrument(skip(self, lesson, player))]
    pub async fn on_route(
        &mut self,
        route: RouteParams,
        lesson: &ContentDescriptor,
        player: Arc<dyn ActivePlayer>,
    ) -> Result<ResumePoint, HostError> {
        ensure!(
            lesson.id == route.content,
            RouteMismatchSnafu {
                expected: route.content,
                actual: lesson.id,
            }
        );

        let resume = self.tracker.bind(lesson, player).await.context(BindPlayerSnafu)?;
        self.reactions = Some(Reactions::new(self.progress_api.clone(), lesson));
        self.route = Some(route);

        if self.coordinator.chapter() != Some(route.chapter) {
            tracing::info!(chapter = %route.chapter, "chapter changed, loading its test");
            self.coordinator
                .load(route.chapter)
                .await
                .context(LoadChapterSnafu)?;
        }

        Ok(resume)
    }

    pub fn on_visibility(&self, visibility: Visibility) {
        if visibility == Visibility::Hidden {
            self.tracker.flush(FlushReason::Hidden);
        }
    }

    pub fn on_unload(&self) {
        self.tracker.flush(FlushReason::Unload);
    }

    pub fn on_navigation_start(&self) {
        self.tracker.flush(FlushReason::Navigation);
    }

    /// Leave the lesson view: flush and release the player.
    pub async fn teardown(&mut self) {
        tracing::info!(route = ?self.route, "tearing down the lesson view");
        self.tracker.unbind().await;
        self.reactions = None;
        self.route = None;
    }

    pub fn route(&self) -> Option<RouteParams> {
        self.route
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn coordinator(&self) -> &AttemptCoordinator {
        &self.coordinator
    }

    pub fn reactions(&self) -> Option<&Reactions> {
        self.reactions.as_ref()
    }
}

/// The course sidebar's view of which chapters are done, fed by the completion signal.
pub struct CourseOutline {
    course: CourseId,
    completed: Arc<DashSet<ChapterId>>,
    task: JoinHandle<()>,
}

impl CourseOutline {
    pub fn follow(course: CourseId, signal: &CompletionSignal) -> Self {
        let completed = Arc::new(DashSet::new());
        let mut completions = signal.subscribe();

        let record = completed.clone();
        let task = tokio::spawn(async move {
            loop {
                match completions.recv().await {
                    Ok(event) => {
                        tracing::info!(%course, chapter = %event.chapter, certificate = event.certificate_issued, "chapter completed");
                        record.insert(event.chapter);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%course, skipped, "missed chapter completions");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            course,
            completed,
            task,
        }
    }

    pub fn course(&self) -> CourseId {
        self.course
    }

    pub fn is_completed(&self, chapter: ChapterId) -> bool {
        self.completed.contains(&chapter)
    }

    pub fn completed(&self) -> Vec<ChapterId> {
        let mut chapters: Vec<_> = self.completed.iter().map(|chapter| *chapter).collect();
        chapters.sort();
        chapters
    }
}

impl Drop for CourseOutline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{AssessmentSettings, ChapterCompleted};
    use crate::model::{ContentType, QuestionKind};
    use crate::player::{ManualPlayer, PlayerKind};
    use crate::progress::{MemoryCache, ProgressSettings, TrackerPhase};
    use crate::testing::{chapter_bank, fixed_clock, settle};
    use crate::transport::{Call, MemoryServer};

    const COURSE: CourseId = CourseId::new(1);
    const CHAPTER: ChapterId = ChapterId::new(2);

    fn host(server: &Arc<MemoryServer>) -> LessonHost {
        let tracker = ProgressTracker::new(
            server.clone(),
            Arc::new(MemoryCache::new()),
            ProgressSettings::default(),
        )
        .with_clock(fixed_clock());
        let coordinator = AttemptCoordinator::new(
            server.clone(),
            AssessmentSettings::default(),
            CompletionSignal::new(),
        );

        LessonHost::new(tracker, coordinator, server.clone())
    }

    fn server() -> Arc<MemoryServer> {
        Arc::new(MemoryServer::new().with_chapter(CHAPTER, chapter_bank(2, QuestionKind::Single)))
    }

    fn route(content: u64) -> RouteParams {
        RouteParams {
            course: COURSE,
            chapter: CHAPTER,
            content: ContentId::new(content),
        }
    }

    fn lesson(content: u64) -> ContentDescriptor {
        ContentDescriptor::new(ContentId::new(content), ContentType::Video)
    }

    fn status_calls(server: &MemoryServer) -> usize {
        server
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Status { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn chapter_is_loaded_once_per_chapter() {
        let server = server();
        let mut host = host(&server);

        host.on_route(route(5), &lesson(5), Arc::new(ManualPlayer::new(PlayerKind::Native)))
            .await
            .unwrap();
        host.on_route(route(6), &lesson(6), Arc::new(ManualPlayer::new(PlayerKind::Native)))
            .await
            .unwrap();

        assert_eq!(status_calls(&server), 1);
        assert_eq!(host.tracker().bound_content(), Some(ContentId::new(6)));
        assert_eq!(host.coordinator().chapter(), Some(CHAPTER));
    }

    #[tokio::test(start_paused = true)]
    async fn hiding_the_page_flushes_the_position() {
        let server = server();
        let mut host = host(&server);
        let player = Arc::new(ManualPlayer::new(PlayerKind::Native));
        host.on_route(route(5), &lesson(5), player.clone()).await.unwrap();

        player.time_update(1.4);
        player.set_time(2.2);
        host.on_visibility(Visibility::Visible);
        host.on_visibility(Visibility::Hidden);
        settle().await;

        assert_eq!(server.positions_sent(ContentId::new(5)), vec![2]);

        player.set_time(3.0);
        host.on_navigation_start();
        settle().await;
        assert_eq!(server.positions_sent(ContentId::new(5)), vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_releases_the_player() {
        let server = server();
        let mut host = host(&server);
        let player = Arc::new(ManualPlayer::new(PlayerKind::Native));
        host.on_route(route(5), &lesson(5), player.clone()).await.unwrap();
        player.set_time(8.0);

        host.teardown().await;

        assert_eq!(player.listeners(), 0);
        assert_eq!(host.tracker().phase(), TrackerPhase::Idle);
        assert_eq!(host.route(), None);
        assert!(host.reactions().is_none());
        assert_eq!(server.positions_sent(ContentId::new(5)), vec![8]);
    }

    #[tokio::test(start_paused = true)]
    async fn lesson_must_match_the_route() {
        let server = server();
        let mut host = host(&server);

        let entered = host
            .on_route(route(5), &lesson(6), Arc::new(ManualPlayer::new(PlayerKind::Native)))
            .await;

        assert!(matches!(entered, Err(HostError::RouteMismatch { .. })));
        assert!(server.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn outline_records_completed_chapters() {
        let signal = CompletionSignal::new();
        let outline = CourseOutline::follow(COURSE, &signal);

        signal.notify(ChapterCompleted {
            chapter: CHAPTER,
            certificate_issued: false,
            score: Some(100.0),
        });
        settle().await;

        assert!(outline.is_completed(CHAPTER));
        assert_eq!(outline.completed(), vec![CHAPTER]);
        assert!(!outline.is_completed(ChapterId::new(9)));
    }
}
