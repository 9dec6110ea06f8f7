//! Drives a [LessonHost] from a scripted sequence of page, player and test events.

use std::sync::Arc;

use snafu::ResultExt;

pub use script::{load, parse, ScriptEvent};

use crate::assessment::CompletionSignal;
use crate::error::{ApplicationError, LessonSnafu};
use crate::host::{CourseOutline, LessonHost, RouteParams};
use crate::model::{AnswerId, AnswerOption, ChapterId, Question, QuestionId, QuestionKind};
use crate::player::ManualPlayer;
use crate::transport::{ChapterBank, MemoryServer};

mod script;

pub struct Replay {
    host: LessonHost,
    completion: CompletionSignal,
    player: Option<Arc<ManualPlayer>>,
    outline: Option<CourseOutline>,
}

impl Replay {
    /// `completion` must be the signal the host's coordinator notifies.
    pub fn new(host: LessonHost, completion: CompletionSignal) -> Self {
        Self {
            host,
            completion,
            player: None,
            outline: None,
        }
    }

    pub fn host(&self) -> &LessonHost {
        &self.host
    }

    pub fn outline(&self) -> Option<&CourseOutline> {
        self.outline.as_ref()
    }

    /// Apply every event in order. Only failing to enter a lesson stops the replay, everything
    /// else is logged and skipped.
    pub async fn run(&mut self, events: Vec<(usize, ScriptEvent)>) -> Result<(), ApplicationError> {
        for (line, event) in events {
            tracing::debug!(line, ?event, "replaying");
            self.apply(event).await?;
        }

        Ok(())
    }

    /// Tear the lesson down and return the chapters completed during the replay.
    pub async fn finish(mut self) -> Vec<ChapterId> {
        self.host.teardown().await;
        self.outline
            .as_ref()
            .map(CourseOutline::completed)
            .unwrap_or_default()
    }

    async fn apply(&mut self, event: ScriptEvent) -> Result<(), ApplicationError> {
        match event {
            ScriptEvent::Route {
                course,
                chapter,
                lesson,
                duration,
            } => {
                let mut player = ManualPlayer::new(lesson.content_type.player_kind());
                if let Some(duration) = duration {
                    player = player.with_duration(duration);
                }
                let player = Arc::new(player);

                if self.outline.as_ref().map(CourseOutline::course) != Some(course) {
                    self.outline = Some(CourseOutline::follow(course, &self.completion));
                }

                let route = RouteParams {
                    course,
                    chapter,
                    content: lesson.id,
                };
                let resume = self
                    .host
                    .on_route(route, &lesson, player.clone())
                    .await
                    .context(LessonSnafu)?;
                tracing::info!(content = %lesson.id, second = resume.second, "lesson opened");

                self.player = Some(player);
            }
            ScriptEvent::TimeUpdate { time } => self.with_player(|player| player.time_update(time)),
            ScriptEvent::Seek { time } => self.with_player(|player| player.seek(time)),
            ScriptEvent::SetTime { time } => self.with_player(|player| player.set_time(time)),
            ScriptEvent::State { state } => self.with_player(|player| player.set_state(state)),
            ScriptEvent::Wait { duration } => tokio::time::sleep(duration).await,
            ScriptEvent::Visibility { visibility } => self.host.on_visibility(visibility),
            ScriptEvent::Unload => self.host.on_unload(),
            ScriptEvent::Navigate => self.host.on_navigation_start(),
            ScriptEvent::StartAnswer => report(self.host.coordinator().start_answer().await),
            ScriptEvent::StartReview => report(self.host.coordinator().start_review().await),
            ScriptEvent::BackToHub => report(self.host.coordinator().back_to_hub().await),
            ScriptEvent::Page { page } => report(self.host.coordinator().go_to_page(page).await),
            ScriptEvent::Select { question, answer } => {
                report(self.host.coordinator().select(question, answer))
            }
            ScriptEvent::Submit => {
                let coordinator = self.host.coordinator();
                if let Ok(result) = coordinator.submit().await.inspect_err(log_failure) {
                    tracing::info!(score = ?result.score, completed = result.chapter_completed, "test submitted");
                }
            }
            ScriptEvent::Like | ScriptEvent::Save => match self.host.reactions() {
                Some(reactions) if event == ScriptEvent::Like => report(reactions.toggle_like().await),
                Some(reactions) => report(reactions.toggle_save().await),
                None => tracing::warn!("no lesson open, reaction ignored"),
            },
            ScriptEvent::Teardown => {
                self.host.teardown().await;
                self.player = None;
            }
        }

        Ok(())
    }

    fn with_player(&self, f: impl FnOnce(&ManualPlayer)) {
        match &self.player {
            Some(player) => f(player),
            None => tracing::warn!("no lesson open, player event ignored"),
        }
    }
}

fn report<T, E: std::fmt::Display>(result: Result<T, E>) {
    let _ = result.inspect_err(log_failure);
}

fn log_failure<E: std::fmt::Display>(error: &E) {
    tracing::warn!(%error, "scripted action failed");
}

/// Three chapters of four single-choice questions. Question `c0n` belongs to chapter `c`, and
/// its first option `c0n0` is the correct one.
pub fn demo_server() -> MemoryServer {
    (1..=3).fold(MemoryServer::new(), |server, chapter| {
        let questions = (1..=4)
            .map(|n| {
                let id = chapter * 100 + n;
                let question = Question {
                    id: QuestionId::new(id),
                    statement: format!("Chapter {chapter}, question {n}"),
                    kind: QuestionKind::Single,
                    options: (0..3)
                        .map(|k| AnswerOption::new(AnswerId::new(id * 10 + k), format!("Answer {k}")))
                        .collect(),
                    selected: Vec::new(),
                };
                (question, vec![AnswerId::new(id * 10)])
            })
            .collect();

        server.with_chapter(ChapterId::new(chapter), ChapterBank::new(questions).with_certificate())
    })
}
