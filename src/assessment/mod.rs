//! The chapter test: a hub that summarizes the server's attempt record, an answering mode that
//! autosaves every edit in order, and a read-only review of the last completed attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::{ensure, Location, OptionExt, ResultExt, Snafu};
use tokio::sync::broadcast;
use tracing::instrument;

use self::autosave::Autosave;
use crate::model::{
    AnswerId, AttemptId, AttemptState, AttemptStatus, ChapterId, CompletionResult, Pagination,
    Question, QuestionId, QuestionPage,
};
use crate::transport::{AssessmentApi, TransportError};

mod autosave;
pub mod selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssessmentSettings {
    pub per_page: u32,
}

impl Default for AssessmentSettings {
    fn default() -> Self {
        Self { per_page: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Hub,
    Answer,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AssessmentError {
    #[snafu(display("no chapter is loaded"))]
    NotLoaded {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not load the attempt status of chapter {chapter}: {source}"))]
    LoadStatus {
        chapter: ChapterId,
        source: TransportError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not load page {page} of chapter {chapter}: {source}"))]
    FetchPage {
        chapter: ChapterId,
        page: u32,
        source: TransportError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not submit the attempt for chapter {chapter}: {source}"))]
    Submit {
        chapter: ChapterId,
        source: TransportError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("chapter {chapter} has no completed attempt to review"))]
    ReviewUnavailable {
        chapter: ChapterId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("chapter {chapter} does not allow another attempt"))]
    RetryNotAllowed {
        chapter: ChapterId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("chapter {chapter} has no open attempt"))]
    NoAttempt {
        chapter: ChapterId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("only an attempt being answered can be submitted, mode is {mode:?}"))]
    NotAnswering {
        mode: Mode,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("the hub has no question pages"))]
    AtHub {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("page {page} is outside 1..={last_page}"))]
    PageOutOfRange {
        page: u32,
        last_page: u32,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("the attempt is already being submitted"))]
    AlreadySubmitting {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("question {question} is not on the current page"))]
    UnknownQuestion {
        question: QuestionId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("question {question} does not offer answer {answer}"))]
    UnknownAnswer {
        question: QuestionId,
        answer: AnswerId,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A chapter whose test was passed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterCompleted {
    pub chapter: ChapterId,
    pub certificate_issued: bool,
    pub score: Option<f64>,
}

/// Shared notification that a chapter was completed, consumed by the course outline.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: broadcast::Sender<ChapterCompleted>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChapterCompleted> {
        self.tx.subscribe()
    }

    pub fn notify(&self, completed: ChapterCompleted) {
        if self.tx.send(completed).is_err() {
            tracing::debug!("nobody listens for chapter completions");
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct State {
    chapter: Option<ChapterId>,
    /// Bumped whenever a chapter is loaded. Responses from an older epoch are stale.
    epoch: u64,
    /// Bumped on every mode entry. Autosaves only go out during the session they were made in.
    session: u64,
    load: LoadState,
    status: Option<AttemptStatus>,
    mode: Mode,
    attempt: Option<AttemptId>,
    page: u32,
    questions: Vec<Question>,
    pagination: Option<Pagination>,
    selections: HashMap<QuestionId, Vec<AnswerId>>,
    submitting: bool,
}

impl State {
    fn enter(&mut self, mode: Mode) {
        self.session += 1;
        self.mode = mode;
        self.page = 1;
        self.questions.clear();
        self.pagination = None;
        self.selections.clear();
    }

    fn loaded_chapter(&self) -> Result<ChapterId, AssessmentError> {
        self.chapter.context(NotLoadedSnafu)
    }
}

/// Drives one chapter's test against the server's attempt record.
///
/// Every method takes `&self`, so a host can share the coordinator between the view and
/// background work. Local state is never locked across a request.
pub struct AttemptCoordinator {
    api: Arc<dyn AssessmentApi>,
    settings: AssessmentSettings,
    completion: CompletionSignal,
    state: Arc<Mutex<State>>,
    autosave: Autosave,
}

impl AttemptCoordinator {
    pub fn new(
        api: Arc<dyn AssessmentApi>,
        settings: AssessmentSettings,
        completion: CompletionSignal,
    ) -> Self {
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        let gate = move |session: u64| {
            let state = lock(&shared);
            match state.mode {
                Mode::Answer if state.session == session => state.attempt,
                _ => None,
            }
        };
        let autosave = Autosave::spawn(api.clone(), gate);

        Self {
            api,
            settings,
            completion,
            state,
            autosave,
        }
    }

    /// Reset everything and bootstrap `chapter` from its attempt status.
    ///
    /// An attempt already in progress is reopened at page 1; otherwise the coordinator rests at
    /// the hub.
    #[instrument(skip(self))]
    pub async fn load(&self, chapter: ChapterId) -> Result<(), AssessmentError> {
        let epoch = {
            let mut state = self.lock();
            let epoch = state.epoch + 1;
            *state = State {
                chapter: Some(chapter),
                epoch,
                session: state.session + 1,
                load: LoadState::Loading,
                ..State::default()
            };
            epoch
        };
        self.autosave.forget_pending();

        let loaded = self.bootstrap(chapter, epoch).await;

        let mut state = self.lock();
        if state.epoch == epoch {
            state.load = match loaded {
                Ok(()) => LoadState::Ready,
                Err(_) => LoadState::Failed,
            };
        }

        loaded
    }

    /// Open a new attempt, or continue the open one, at page 1.
    #[instrument(skip(self))]
    pub async fn start_answer(&self) -> Result<(), AssessmentError> {
        let (chapter, epoch) = {
            let mut state = self.lock();
            let chapter = state.loaded_chapter()?;
            if let Some(status) = &state.status {
                ensure!(status.allows_new_attempt(), RetryNotAllowedSnafu { chapter });
            }

            state.enter(Mode::Answer);
            (chapter, state.epoch)
        };

        if let Err(error) = self.fetch_page(chapter, epoch, Mode::Answer, 1).await {
            self.fall_back_to_hub(epoch);
            return Err(error);
        }

        self.refresh_status(chapter, epoch).await;
        Ok(())
    }

    /// Show the last completed attempt, read-only.
    #[instrument(skip(self))]
    pub async fn start_review(&self) -> Result<(), AssessmentError> {
        let (chapter, epoch) = {
            let mut state = self.lock();
            let chapter = state.loaded_chapter()?;
            let reviewable = state
                .status
                .as_ref()
                .map_or(false, |status| status.can_view_last_answers);
            ensure!(reviewable, ReviewUnavailableSnafu { chapter });

            state.enter(Mode::Review);
            (chapter, state.epoch)
        };

        if let Err(error) = self.fetch_page(chapter, epoch, Mode::Review, 1).await {
            self.fall_back_to_hub(epoch);
            return Err(error);
        }

        self.refresh_status(chapter, epoch).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn back_to_hub(&self) -> Result<(), AssessmentError> {
        let (chapter, epoch) = {
            let mut state = self.lock();
            let chapter = state.loaded_chapter()?;
            state.enter(Mode::Hub);
            (chapter, state.epoch)
        };

        self.refresh_status(chapter, epoch).await;
        Ok(())
    }

    /// Fetch another page of the attempt being answered or reviewed.
    #[instrument(skip(self))]
    pub async fn go_to_page(&self, page: u32) -> Result<(), AssessmentError> {
        let (chapter, epoch, mode) = {
            let state = self.lock();
            let chapter = state.loaded_chapter()?;
            ensure!(state.mode != Mode::Hub, AtHubSnafu);
            if let Some(pagination) = &state.pagination {
                ensure!(
                    pagination.contains(page),
                    PageOutOfRangeSnafu {
                        page,
                        last_page: pagination.last_page,
                    }
                );
            }
            (chapter, state.epoch, state.mode)
        };

        self.fetch_page(chapter, epoch, mode, page).await
    }

    /// Pick `answer` for `question` and queue the new selection for saving.
    ///
    /// Outside answering mode this does nothing.
    pub fn select(&self, question: QuestionId, answer: AnswerId) -> Result<(), AssessmentError> {
        let mut state = self.lock();
        if state.mode != Mode::Answer {
            tracing::debug!(mode = ?state.mode, %question, "not answering, selection ignored");
            return Ok(());
        }

        let target = state
            .questions
            .iter()
            .find(|candidate| candidate.id == question)
            .context(UnknownQuestionSnafu { question })?;
        ensure!(target.offers(answer), UnknownAnswerSnafu { question, answer });

        let kind = target.kind;
        let current = state
            .selections
            .get(&question)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let next = selection::apply(kind, current, answer);

        state.selections.insert(question, next.clone());
        // still under the lock, so the queue sees edits in the order they were applied
        self.autosave.enqueue(state.session, question, next);
        Ok(())
    }

    /// Wait for every selection made so far to be saved or discarded.
    pub async fn settled(&self) {
        self.autosave.settled().await;
    }

    /// Complete the attempt once pending selections are saved.
    ///
    /// On success the chapter's completion is announced when passed, and the coordinator returns
    /// to the hub with a fresh status. On failure it keeps answering.
    #[instrument(skip(self))]
    pub async fn submit(&self) -> Result<CompletionResult, AssessmentError> {
        let (chapter, epoch, attempt) = {
            let mut state = self.lock();
            let chapter = state.loaded_chapter()?;
            ensure!(
                state.mode == Mode::Answer,
                NotAnsweringSnafu { mode: state.mode }
            );
            ensure!(!state.submitting, AlreadySubmittingSnafu);
            let attempt = state.attempt.context(NoAttemptSnafu { chapter })?;

            state.submitting = true;
            (chapter, state.epoch, attempt)
        };

        self.autosave.settled().await;
        let completed = self.api.complete_attempt(attempt).await;
        self.lock().submitting = false;

        let result = completed.context(SubmitSnafu { chapter })?;
        tracing::info!(%chapter, %attempt, ?result, "attempt submitted");

        if result.chapter_completed {
            self.completion.notify(ChapterCompleted {
                chapter,
                certificate_issued: result.certificate_issued,
                score: result.score,
            });
        }

        {
            let mut state = self.lock();
            if state.epoch == epoch {
                state.enter(Mode::Hub);
                state.attempt = None;
            }
        }

        if let Err(error) = self.bootstrap(chapter, epoch).await {
            tracing::warn!(%error, "could not refresh the chapter after submitting");
            let mut state = self.lock();
            if state.epoch == epoch {
                state.load = LoadState::Failed;
            }
        }

        Ok(result)
    }

    pub fn chapter(&self) -> Option<ChapterId> {
        self.lock().chapter
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn load_state(&self) -> LoadState {
        self.lock().load
    }

    pub fn status(&self) -> Option<AttemptStatus> {
        self.lock().status.clone()
    }

    pub fn attempt_id(&self) -> Option<AttemptId> {
        self.lock().attempt
    }

    /// Current page number, meaningless at the hub.
    pub fn page(&self) -> u32 {
        self.lock().page
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.lock().pagination
    }

    pub fn questions(&self) -> Vec<Question> {
        self.lock().questions.clone()
    }

    pub fn selection(&self, question: QuestionId) -> Vec<AnswerId> {
        self.lock()
            .selections
            .get(&question)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_submitting(&self) -> bool {
        self.lock().submitting
    }

    async fn bootstrap(&self, chapter: ChapterId, epoch: u64) -> Result<(), AssessmentError> {
        let status = self
            .api
            .fetch_attempt_status(chapter)
            .await
            .context(LoadStatusSnafu { chapter })?;

        let resume = status.state == AttemptState::InProgress;
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                return Ok(());
            }

            if resume {
                tracing::info!(attempt = ?status.in_progress_attempt_id, "resuming the attempt in progress");
                state.enter(Mode::Answer);
                state.attempt = status.in_progress_attempt_id;
            }
            state.status = Some(status);
        }

        if resume {
            self.fetch_page(chapter, epoch, Mode::Answer, 1).await?;
        }

        Ok(())
    }

    async fn fetch_page(
        &self,
        chapter: ChapterId,
        epoch: u64,
        mode: Mode,
        page: u32,
    ) -> Result<(), AssessmentError> {
        let fetched = self
            .api
            .fetch_question_page(chapter, page, self.settings.per_page, mode == Mode::Review)
            .await
            .context(FetchPageSnafu { chapter, page })?;

        let mut state = self.lock();
        if state.epoch != epoch || state.mode != mode {
            tracing::debug!(%chapter, page, "dropping a page that arrived after leaving its view");
            return Ok(());
        }

        self.apply_page(&mut state, fetched);
        Ok(())
    }

    /// Merge a fetched page into local state. Only the questions on the page are overwritten,
    /// and a question whose edit is still being saved shows that edit instead of the server's copy.
    fn apply_page(&self, state: &mut State, fetched: QuestionPage) {
        let answering = state.mode == Mode::Answer;
        if answering {
            if let Some(attempt) = fetched.attempt_id {
                state.attempt = Some(attempt);
            }
        }

        for question in &fetched.questions {
            let selected = answering
                .then(|| self.autosave.pending_answers(question.id, state.session))
                .flatten()
                .unwrap_or_else(|| question.selected.clone());
            state.selections.insert(question.id, selected);
        }

        state.page = fetched.pagination.page;
        state.pagination = Some(fetched.pagination);
        state.questions = fetched.questions;
    }

    /// Status is refetched on every mode change. A failure here only leaves the old summary.
    async fn refresh_status(&self, chapter: ChapterId, epoch: u64) {
        match self.api.fetch_attempt_status(chapter).await {
            Ok(status) => {
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.status = Some(status);
                }
            }
            Err(error) => tracing::warn!(%error, %chapter, "could not refresh the attempt status"),
        }
    }

    fn fall_back_to_hub(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.enter(Mode::Hub);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
