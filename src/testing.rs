//! Fixtures shared by the unit tests.

use std::time::Duration;

use crate::model::{AnswerId, AnswerOption, Question, QuestionId, QuestionKind};
use crate::time::Clock;
use crate::transport::ChapterBank;

/// 2023-11-14T22:13:20Z, in epoch millis.
pub const T0: i64 = 1_700_000_000_000;

pub fn fixed_clock() -> Clock {
    Clock::fixed(chrono::DateTime::from_timestamp_millis(T0).unwrap())
}

/// Let spawned tasks catch up without crossing any window or poll deadline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Question `n` offers answers `n*10`, `n*10 + 1` and `n*10 + 2`.
pub fn question(n: u64, kind: QuestionKind) -> Question {
    Question {
        id: QuestionId::new(n),
        statement: format!("Question {n}"),
        kind,
        options: (0..3)
            .map(|offset| AnswerOption::new(AnswerId::new(n * 10 + offset), format!("Option {offset}")))
            .collect(),
        selected: Vec::new(),
    }
}

/// The first option of every question is the correct one.
pub fn correct_answer(question: QuestionId) -> AnswerId {
    AnswerId::new(question.value() * 10)
}

pub fn chapter_bank(count: u64, kind: QuestionKind) -> ChapterBank {
    let questions = (1..=count)
        .map(|n| (question(n, kind), vec![correct_answer(QuestionId::new(n))]))
        .collect();

    ChapterBank::new(questions)
}
