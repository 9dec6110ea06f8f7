use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use snafu::OptionExt as _;
use tracing::instrument;

use super::{
    AssessmentApi, NotFoundSnafu, ProgressApi, RejectedSnafu, RequestSnafu, Result,
};
use crate::model::{
    AnswerId, AttemptId, AttemptState, AttemptStatus, ChapterId, CompletionResult, ContentId,
    Pagination, Question, QuestionId, QuestionPage, Reaction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SendPosition,
    SetReaction,
    SendAnswer,
    FetchStatus,
    FetchPage,
    CompleteAttempt,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::SendPosition => "send_position",
            Operation::SetReaction => "set_reaction",
            Operation::SendAnswer => "send_answer_selection",
            Operation::FetchStatus => "fetch_attempt_status",
            Operation::FetchPage => "fetch_question_page",
            Operation::CompleteAttempt => "complete_attempt",
        };
        write!(f, "{name}")
    }
}

/// Every request the server saw, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Position {
        content: ContentId,
        second: u64,
    },
    Reaction {
        content: ContentId,
        reaction: Reaction,
        active: bool,
    },
    AnswerStarted {
        attempt: AttemptId,
        question: QuestionId,
        answers: Vec<AnswerId>,
    },
    AnswerFinished {
        question: QuestionId,
        accepted: bool,
    },
    Status {
        chapter: ChapterId,
    },
    Page {
        chapter: ChapterId,
        page: u32,
        review_last: bool,
    },
    Complete {
        attempt: AttemptId,
    },
}

/// A chapter's questions together with their correct answers.
#[derive(Debug, Clone)]
pub struct ChapterBank {
    questions: Vec<(Question, Vec<AnswerId>)>,
    can_retry: bool,
    pass_mark: f64,
    issues_certificate: bool,
}

impl ChapterBank {
    pub fn new(questions: Vec<(Question, Vec<AnswerId>)>) -> Self {
        Self {
            questions,
            can_retry: true,
            pass_mark: 60.0,
            issues_certificate: false,
        }
    }

    pub fn without_retry(mut self) -> Self {
        self.can_retry = false;
        self
    }

    pub fn with_pass_mark(mut self, pass_mark: f64) -> Self {
        self.pass_mark = pass_mark;
        self
    }

    pub fn with_certificate(mut self) -> Self {
        self.issues_certificate = true;
        self
    }

    fn owns(&self, question: QuestionId) -> bool {
        self.questions.iter().any(|(q, _)| q.id == question)
    }

    fn score(&self, answers: &HashMap<QuestionId, Vec<AnswerId>>) -> f64 {
        if self.questions.is_empty() {
            return 100.0;
        }

        let correct = self
            .questions
            .iter()
            .filter(|(question, expected)| {
                let mut given = answers.get(&question.id).cloned().unwrap_or_default();
                let mut expected = expected.clone();
                given.sort();
                expected.sort();
                given == expected
            })
            .count();

        correct as f64 * 100.0 / self.questions.len() as f64
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    id: AttemptId,
    answers: HashMap<QuestionId, Vec<AnswerId>>,
}

#[derive(Debug, Clone, Default)]
struct ChapterRecord {
    open: Option<AttemptRecord>,
    last: Option<AttemptRecord>,
    completed_count: u32,
    last_score: Option<f64>,
}

/// In-process server for the transport traits.
///
/// Backs the replay binary and the tests: it keeps positions, reactions and attempts in memory,
/// logs every call, and can be told to delay or fail individual operations.
#[derive(Debug, Default)]
pub struct MemoryServer {
    banks: DashMap<ChapterId, ChapterBank>,
    records: DashMap<ChapterId, ChapterRecord>,
    attempt_chapters: DashMap<AttemptId, ChapterId>,
    next_attempt: AtomicU64,
    positions: DashMap<ContentId, u64>,
    reactions: DashMap<(ContentId, Reaction), bool>,
    calls: Mutex<Vec<Call>>,
    failing: DashSet<Operation>,
    latency: DashMap<Operation, Duration>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            next_attempt: AtomicU64::new(1),
            ..Self::default()
        }
    }

    pub fn with_chapter(self, chapter: ChapterId, bank: ChapterBank) -> Self {
        self.banks.insert(chapter, bank);
        self
    }

    /// Open an attempt without going through a page fetch, as if started in another tab.
    pub fn open_attempt(&self, chapter: ChapterId) -> Option<AttemptId> {
        if !self.banks.contains_key(&chapter) {
            return None;
        }

        let mut record = self.records.entry(chapter).or_default();
        let open = record.open.get_or_insert_with(|| self.new_attempt(chapter));
        Some(open.id)
    }

    pub fn fail(&self, operation: Operation) {
        self.failing.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.failing.remove(&operation);
    }

    pub fn set_latency(&self, operation: Operation, latency: Duration) {
        self.latency.insert(operation, latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Seconds sent for `content`, in order.
    pub fn positions_sent(&self, content: ContentId) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Position { content: c, second } if c == content => Some(second),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, content: ContentId) -> Option<u64> {
        self.positions.get(&content).map(|second| *second)
    }

    pub fn reaction(&self, content: ContentId, reaction: Reaction) -> bool {
        self.reactions
            .get(&(content, reaction))
            .map_or(false, |active| *active)
    }

    pub fn stored_answers(&self, attempt: AttemptId, question: QuestionId) -> Option<Vec<AnswerId>> {
        let chapter = *self.attempt_chapters.get(&attempt)?;
        let record = self.records.get(&chapter)?;

        let stored = [record.open.as_ref(), record.last.as_ref()]
            .into_iter()
            .flatten()
            .find(|candidate| candidate.id == attempt)
            .and_then(|candidate| candidate.answers.get(&question).cloned());
        stored
    }

    fn new_attempt(&self, chapter: ChapterId) -> AttemptRecord {
        let id = AttemptId::new(self.next_attempt.fetch_add(1, Ordering::Relaxed));
        self.attempt_chapters.insert(id, chapter);

        AttemptRecord {
            id,
            answers: HashMap::new(),
        }
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    async fn simulate(&self, operation: Operation) -> Result<()> {
        let latency = self.latency.get(&operation).map(|latency| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.contains(&operation) {
            return RequestSnafu {
                operation,
                message: "simulated outage",
            }
            .fail();
        }

        Ok(())
    }

    fn bank(&self, chapter: ChapterId, operation: Operation) -> Result<ChapterBank> {
        self.banks
            .get(&chapter)
            .map(|bank| bank.clone())
            .context(NotFoundSnafu { operation })
    }

    fn page_of(
        &self,
        bank: &ChapterBank,
        attempt: &AttemptRecord,
        page: u32,
        per_page: u32,
    ) -> QuestionPage {
        let per_page = per_page.max(1);
        let total = bank.questions.len() as u32;
        let last_page = total.div_ceil(per_page).max(1);
        let skip = (page.saturating_sub(1) * per_page) as usize;

        let questions = bank
            .questions
            .iter()
            .skip(skip)
            .take(per_page as usize)
            .map(|(question, _)| Question {
                selected: attempt.answers.get(&question.id).cloned().unwrap_or_default(),
                ..question.clone()
            })
            .collect();

        QuestionPage {
            attempt_id: Some(attempt.id),
            questions,
            pagination: Pagination {
                page,
                per_page,
                total,
                last_page,
            },
        }
    }
}

#[async_trait]
impl ProgressApi for MemoryServer {
    #[instrument(skip(self))]
    async fn send_position(&self, content: ContentId, second: u64) -> Result<()> {
        self.record(Call::Position { content, second });
        self.simulate(Operation::SendPosition).await?;

        self.positions.insert(content, second);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_reaction(
        &self,
        content: ContentId,
        reaction: Reaction,
        active: bool,
    ) -> Result<()> {
        self.record(Call::Reaction {
            content,
            reaction,
            active,
        });
        self.simulate(Operation::SetReaction).await?;

        self.reactions.insert((content, reaction), active);
        Ok(())
    }
}

#[async_trait]
impl AssessmentApi for MemoryServer {
    #[instrument(skip(self))]
    async fn send_answer_selection(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        answers: &[AnswerId],
    ) -> Result<()> {
        self.record(Call::AnswerStarted {
            attempt,
            question,
            answers: answers.to_vec(),
        });

        let outcome = self.store_answer(attempt, question, answers).await;
        self.record(Call::AnswerFinished {
            question,
            accepted: outcome.is_ok(),
        });

        outcome
    }

    #[instrument(skip(self))]
    async fn fetch_attempt_status(&self, chapter: ChapterId) -> Result<AttemptStatus> {
        let operation = Operation::FetchStatus;
        self.record(Call::Status { chapter });
        self.simulate(operation).await?;

        let bank = self.bank(chapter, operation)?;
        let record = self
            .records
            .get(&chapter)
            .map(|record| record.clone())
            .unwrap_or_default();

        let state = match (&record.open, record.completed_count) {
            (Some(_), _) => AttemptState::InProgress,
            (None, 0) => AttemptState::NotStarted,
            (None, _) => AttemptState::Completed,
        };

        Ok(AttemptStatus {
            state,
            can_retry: bank.can_retry,
            can_view_last_answers: record.last.is_some(),
            in_progress_attempt_id: record.open.as_ref().map(|open| open.id),
            last_score: record.last_score,
            completed_count: record.completed_count,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_question_page(
        &self,
        chapter: ChapterId,
        page: u32,
        per_page: u32,
        review_last: bool,
    ) -> Result<QuestionPage> {
        let operation = Operation::FetchPage;
        self.record(Call::Page {
            chapter,
            page,
            review_last,
        });
        self.simulate(operation).await?;

        let bank = self.bank(chapter, operation)?;
        let mut record = self.records.entry(chapter).or_default();

        if review_last {
            let last = record.last.as_ref().context(NotFoundSnafu { operation })?;
            return Ok(self.page_of(&bank, last, page, per_page));
        }

        if record.open.is_none() {
            if record.completed_count > 0 && !bank.can_retry {
                return RejectedSnafu {
                    operation,
                    message: "no retries left for this chapter",
                }
                .fail();
            }

            record.open = Some(self.new_attempt(chapter));
        }

        let open = record.open.as_ref().context(NotFoundSnafu { operation })?;
        Ok(self.page_of(&bank, open, page, per_page))
    }

    #[instrument(skip(self))]
    async fn complete_attempt(&self, attempt: AttemptId) -> Result<CompletionResult> {
        let operation = Operation::CompleteAttempt;
        self.record(Call::Complete { attempt });
        self.simulate(operation).await?;

        let chapter = self
            .attempt_chapters
            .get(&attempt)
            .map(|chapter| *chapter)
            .context(NotFoundSnafu { operation })?;
        let bank = self.bank(chapter, operation)?;
        let mut record = self.records.entry(chapter).or_default();

        let open = match record.open.take() {
            Some(open) if open.id == attempt => open,
            other => {
                record.open = other;
                return RejectedSnafu {
                    operation,
                    message: format!("attempt {attempt} is not open"),
                }
                .fail();
            }
        };

        let score = bank.score(&open.answers);
        let chapter_completed = score >= bank.pass_mark;

        record.last = Some(open);
        record.completed_count += 1;
        record.last_score = Some(score);

        Ok(CompletionResult {
            chapter_completed,
            certificate_issued: chapter_completed && bank.issues_certificate,
            score: Some(score),
        })
    }
}

impl MemoryServer {
    async fn store_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        answers: &[AnswerId],
    ) -> Result<()> {
        let operation = Operation::SendAnswer;
        self.simulate(operation).await?;

        let chapter = self
            .attempt_chapters
            .get(&attempt)
            .map(|chapter| *chapter)
            .context(NotFoundSnafu { operation })?;

        if !self.bank(chapter, operation)?.owns(question) {
            return NotFoundSnafu { operation }.fail();
        }

        let mut record = self.records.entry(chapter).or_default();
        match record.open.as_mut() {
            Some(open) if open.id == attempt => {
                open.answers.insert(question, answers.to_vec());
                Ok(())
            }
            _ => RejectedSnafu {
                operation,
                message: format!("attempt {attempt} is not open"),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerOption, QuestionKind};

    fn bank() -> ChapterBank {
        let questions = (1..=3)
            .map(|n| {
                let question = Question {
                    id: QuestionId::new(n),
                    statement: format!("Q{n}"),
                    kind: QuestionKind::Single,
                    options: vec![
                        AnswerOption::new(AnswerId::new(n * 10), "yes".to_string()),
                        AnswerOption::new(AnswerId::new(n * 10 + 1), "no".to_string()),
                    ],
                    selected: Vec::new(),
                };
                (question, vec![AnswerId::new(n * 10)])
            })
            .collect();

        ChapterBank::new(questions)
    }

    #[tokio::test]
    async fn first_page_request_opens_an_attempt() {
        let chapter = ChapterId::new(1);
        let server = MemoryServer::new().with_chapter(chapter, bank());

        let page = server.fetch_question_page(chapter, 1, 2, false).await.unwrap();
        assert_eq!(page.questions.len(), 2);
        assert_eq!(page.pagination.last_page, 2);

        let status = server.fetch_attempt_status(chapter).await.unwrap();
        assert_eq!(status.state, AttemptState::InProgress);
        assert_eq!(status.in_progress_attempt_id, page.attempt_id);
    }

    #[tokio::test]
    async fn completing_scores_and_closes_the_attempt() {
        let chapter = ChapterId::new(1);
        let server = MemoryServer::new().with_chapter(chapter, bank().without_retry());
        let attempt = server.open_attempt(chapter).unwrap();

        for n in 1..=2 {
            server
                .send_answer_selection(attempt, QuestionId::new(n), &[AnswerId::new(n * 10)])
                .await
                .unwrap();
        }

        let result = server.complete_attempt(attempt).await.unwrap();
        assert!(result.chapter_completed);
        assert!((result.score.unwrap() - 66.666).abs() < 0.01);

        let status = server.fetch_attempt_status(chapter).await.unwrap();
        assert_eq!(status.state, AttemptState::Completed);
        assert!(status.can_view_last_answers);

        let retry = server.fetch_question_page(chapter, 1, 5, false).await;
        assert!(matches!(retry, Err(crate::transport::TransportError::Rejected { .. })));
    }

    #[tokio::test]
    async fn answers_for_a_closed_attempt_are_rejected() {
        let chapter = ChapterId::new(1);
        let server = MemoryServer::new().with_chapter(chapter, bank());
        let attempt = server.open_attempt(chapter).unwrap();
        server.complete_attempt(attempt).await.unwrap();

        let late = server
            .send_answer_selection(attempt, QuestionId::new(1), &[AnswerId::new(10)])
            .await;
        assert!(late.is_err());
        assert_eq!(
            server.calls().last(),
            Some(&Call::AnswerFinished {
                question: QuestionId::new(1),
                accepted: false
            })
        );
    }

    #[tokio::test]
    async fn failing_operations_are_still_logged() {
        let server = MemoryServer::new();
        server.fail(Operation::SendPosition);

        let content = ContentId::new(4);
        assert!(server.send_position(content, 12).await.is_err());
        assert_eq!(server.positions_sent(content), vec![12]);
        assert_eq!(server.position(content), None);
    }
}
