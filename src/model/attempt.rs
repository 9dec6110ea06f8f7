use serde::{Deserialize, Serialize};

use super::{AnswerId, AttemptId, QuestionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Completed,
}

/// Attempt summary for one chapter, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptStatus {
    pub state: AttemptState,
    pub can_retry: bool,
    pub can_view_last_answers: bool,
    pub in_progress_attempt_id: Option<AttemptId>,
    pub last_score: Option<f64>,
    pub completed_count: u32,
}

impl AttemptStatus {
    pub fn not_started() -> Self {
        Self {
            state: AttemptState::NotStarted,
            can_retry: true,
            can_view_last_answers: false,
            in_progress_attempt_id: None,
            last_score: None,
            completed_count: 0,
        }
    }

    /// A new attempt may be opened unless the last one is completed and retries are closed.
    pub fn allows_new_attempt(&self) -> bool {
        self.state != AttemptState::Completed || self.can_retry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Single,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct AnswerOption {
    pub id: AnswerId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub statement: String,
    pub kind: QuestionKind,
    pub options: Vec<AnswerOption>,
    /// Selections the server has confirmed for this attempt.
    #[serde(default)]
    pub selected: Vec<AnswerId>,
}

impl Question {
    pub fn offers(&self, answer: AnswerId) -> bool {
        self.options.iter().any(|option| option.id == answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u32,
    pub last_page: u32,
}

impl Pagination {
    pub fn contains(&self, page: u32) -> bool {
        page >= 1 && page <= self.last_page.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPage {
    pub attempt_id: Option<AttemptId>,
    pub questions: Vec<Question>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub chapter_completed: bool,
    pub certificate_issued: bool,
    #[serde(default)]
    pub score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_attempt_without_retry_blocks_new_attempts() {
        let status = AttemptStatus {
            state: AttemptState::Completed,
            can_retry: false,
            ..AttemptStatus::not_started()
        };

        assert!(!status.allows_new_attempt());
        assert!(AttemptStatus::not_started().allows_new_attempt());
    }

    #[test]
    fn pagination_bounds() {
        let pagination = Pagination {
            page: 1,
            per_page: 5,
            total: 12,
            last_page: 3,
        };

        assert!(pagination.contains(3));
        assert!(!pagination.contains(0));
        assert!(!pagination.contains(4));
    }

    #[test]
    fn status_reads_snake_case_state() {
        let status: AttemptStatus = serde_json::from_value(serde_json::json!({
            "state": "in_progress",
            "can_retry": true,
            "can_view_last_answers": false,
            "in_progress_attempt_id": 77,
            "last_score": null,
            "completed_count": 0,
        }))
        .unwrap();

        assert_eq!(status.state, AttemptState::InProgress);
        assert_eq!(status.in_progress_attempt_id, Some(AttemptId::new(77)));
    }
}
