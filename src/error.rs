use std::path::PathBuf;

use snafu::{Location, Snafu};

use crate::config::ConfigError;
use crate::host::HostError;
use crate::progress::CacheError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// could not load the configuration
    #[snafu(transparent)]
    Config { source: ConfigError },

    /// Could not initialize the logger
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not open the local progress cache
    OpenCache {
        source: CacheError,
        #[snafu(implicit)]
        location: Location,
    },

    /// No script was given, set `COURSETRACK_SCRIPT` or pass a path
    MissingScript {
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not read the event script
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// A line of the event script is not a valid event
    #[snafu(display("line {line} of the event script is invalid: {source}"))]
    ParseScript {
        line: usize,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not enter the lesson
    Lesson {
        source: HostError,
        #[snafu(implicit)]
        location: Location,
    },
}
