pub mod assessment;
pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod model;
pub mod player;
pub mod progress;
pub mod reactions;
pub mod replay;
pub mod sink;
pub mod time;
pub mod transport;

mod macros;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::assessment::{AssessmentError, AttemptCoordinator, CompletionSignal, Mode};
    pub use crate::config::Config;
    pub use crate::host::{CourseOutline, LessonHost, RouteParams};
    pub use crate::model::*;
    pub use crate::player::{ActivePlayer, PlaybackState, PlayerEvent, PlayerKind};
    pub use crate::progress::{FlushReason, ProgressTracker, TrackerError, TrackerPhase};
    pub use crate::time::{Clock, Timestamp};
    pub use crate::transport::{AssessmentApi, ProgressApi, TransportError};
}
