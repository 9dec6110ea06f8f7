//! The narrow boundary between the engines and whatever performs request/response I/O.

use async_trait::async_trait;
use snafu::{Location, Snafu};

use crate::model::{
    AnswerId, AttemptId, AttemptStatus, ChapterId, CompletionResult, ContentId, QuestionId,
    QuestionPage, Reaction,
};

pub use memory::{Call, ChapterBank, MemoryServer, Operation};

mod memory;

pub type Result<T, E = TransportError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("request `{operation}` failed: {message}"))]
    Request {
        operation: Operation,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("server rejected `{operation}`: {message}"))]
    Rejected {
        operation: Operation,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("`{operation}` refers to something the server does not know"))]
    NotFound {
        operation: Operation,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Endpoints used while watching a lesson.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    async fn send_position(&self, content: ContentId, second: u64) -> Result<()>;

    async fn set_reaction(&self, content: ContentId, reaction: Reaction, active: bool)
        -> Result<()>;
}

/// Endpoints used while taking a chapter's test.
#[async_trait]
pub trait AssessmentApi: Send + Sync {
    async fn send_answer_selection(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        answers: &[AnswerId],
    ) -> Result<()>;

    async fn fetch_attempt_status(&self, chapter: ChapterId) -> Result<AttemptStatus>;

    /// With `review_last` the page shows the last completed attempt, otherwise the open
    /// attempt, which the server creates on first request.
    async fn fetch_question_page(
        &self,
        chapter: ChapterId,
        page: u32,
        per_page: u32,
        review_last: bool,
    ) -> Result<QuestionPage>;

    async fn complete_attempt(&self, attempt: AttemptId) -> Result<CompletionResult>;
}
