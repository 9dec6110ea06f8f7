use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{ApplicationError, ParseScriptSnafu, ReadScriptSnafu};
use crate::host::Visibility;
use crate::model::{AnswerId, ChapterId, ContentDescriptor, CourseId, QuestionId};
use crate::player::PlaybackState;
use crate::time::deserialize_duration;

/// One line of an event script, e.g. `{"event": "seek", "time": 40.0}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Open a lesson. The player kind follows the lesson's content type.
    Route {
        course: CourseId,
        chapter: ChapterId,
        lesson: ContentDescriptor,
        #[serde(default)]
        duration: Option<f64>,
    },
    TimeUpdate {
        time: f64,
    },
    Seek {
        time: f64,
    },
    /// Move the playhead without an event, as an embedded player does between polls.
    SetTime {
        time: f64,
    },
    State {
        state: PlaybackState,
    },
    Wait {
        #[serde(deserialize_with = "deserialize_duration")]
        duration: Duration,
    },
    Visibility {
        visibility: Visibility,
    },
    Unload,
    Navigate,
    StartAnswer,
    StartReview,
    BackToHub,
    Page {
        page: u32,
    },
    Select {
        question: QuestionId,
        answer: AnswerId,
    },
    Submit,
    Like,
    Save,
    Teardown,
}

/// Parse a JSON-lines script. Blank lines and lines starting with `#` are skipped.
pub fn parse(text: &str) -> Result<Vec<(usize, ScriptEvent)>, ApplicationError> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str(text)
                .map(|event| (line, event))
                .context(ParseScriptSnafu { line })
        })
        .collect()
}

pub fn load(path: &Path) -> Result<Vec<(usize, ScriptEvent)>, ApplicationError> {
    let text = std::fs::read_to_string(path).context(ReadScriptSnafu { path })?;
    parse(&text)
}
