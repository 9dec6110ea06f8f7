use serde::{Deserialize, Serialize};

use super::{ContentId, LastView};
use crate::player::PlayerKind;

/// How the server declares a lesson's media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Youtube,
}

impl ContentType {
    pub fn player_kind(self) -> PlayerKind {
        match self {
            ContentType::Video => PlayerKind::Native,
            ContentType::Youtube => PlayerKind::Embedded,
        }
    }
}

/// The lesson fields the engine needs, as delivered by the lesson endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_new::new)]
pub struct ContentDescriptor {
    pub id: ContentId,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    #[new(default)]
    pub last_view: Option<LastView>,
    #[serde(default)]
    #[new(default)]
    pub liked: bool,
    #[serde(default)]
    #[new(default)]
    pub saved: bool,
}

impl ContentDescriptor {
    pub fn with_last_view(mut self, last_view: LastView) -> Self {
        self.last_view = Some(last_view);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Save,
}

impl std::fmt::Display for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reaction::Like => write!(f, "like"),
            Reaction::Save => write!(f, "save"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reads_the_lesson_payload() {
        let json = serde_json::json!({
            "id": 5,
            "type": "youtube",
            "last_view": { "second_seen": 40, "updated_at": "2023-11-14T22:13:20Z" },
        });

        let lesson: ContentDescriptor = serde_json::from_value(json).unwrap();

        assert_eq!(lesson.id, ContentId::new(5));
        assert_eq!(lesson.content_type.player_kind(), PlayerKind::Embedded);
        assert_eq!(lesson.last_view.map(|view| view.second_seen), Some(40));
        assert!(!lesson.liked);
    }
}
