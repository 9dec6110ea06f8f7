use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Whole seconds into a content item, as committed to the server and the local cache.
///
/// Serializes as `{ "second": 55, "ts": 1700000000000 }`, the layout of a local cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct PlaybackPosition {
    pub second: u64,
    #[serde(rename = "ts")]
    pub observed_at_epoch_millis: i64,
}

/// Server-side record of the last position, as delivered with the lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct LastView {
    pub second_seen: u64,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    Remote,
    Local,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub second: u64,
    pub source: ResumeSource,
}

impl ResumePoint {
    pub const START: ResumePoint = ResumePoint {
        second: 0,
        source: ResumeSource::Start,
    };
}

/// Pick the position to resume from.
///
/// The local entry wins when it was written after the server's `updated_at`, or when it is
/// strictly further along. A remote record without `updated_at` counts as older than any local
/// entry.
pub fn resolve_resume(remote: Option<&LastView>, local: Option<&PlaybackPosition>) -> ResumePoint {
    match (remote, local) {
        (None, None) => ResumePoint::START,
        (Some(remote), None) => ResumePoint {
            second: remote.second_seen,
            source: ResumeSource::Remote,
        },
        (None, Some(local)) => ResumePoint {
            second: local.second,
            source: ResumeSource::Local,
        },
        (Some(remote), Some(local)) => {
            let newer = remote
                .updated_at
                .map_or(true, |at| local.observed_at_epoch_millis > at.timestamp_millis());
            let further = local.second > remote.second_seen;

            if newer || further {
                ResumePoint {
                    second: local.second,
                    source: ResumeSource::Local,
                }
            } else {
                ResumePoint {
                    second: remote.second_seen,
                    source: ResumeSource::Remote,
                }
            }
        }
    }
}

/// Floor a raw player time to whole seconds. Negative and non-finite samples become zero.
pub fn floor_second(raw: f64) -> u64 {
    if raw.is_finite() && raw > 0.0 {
        raw.floor() as u64
    } else {
        0
    }
}
