use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use snafu::{Location, ResultExt, Snafu};

use crate::assessment::AssessmentSettings;
use crate::progress::ProgressSettings;
use crate::time::deserialize_duration;

/// Environment prefix for every setting, e.g. `COURSETRACK_WINDOW=4s`.
pub const PREFIX: &str = "COURSETRACK_";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// could not read the configuration from the environment
    ConfigLoad {
        source: envy::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "defaults::log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "defaults::cache_path")]
    pub cache_path: PathBuf,
    /// JSON-lines event script replayed by the binary.
    #[serde(default)]
    pub script: Option<PathBuf>,

    #[serde(default = "defaults::window", deserialize_with = "deserialize_duration")]
    pub window: Duration,
    #[serde(default = "defaults::jump_threshold", deserialize_with = "deserialize_duration")]
    pub jump_threshold: Duration,
    #[serde(default = "defaults::poll_interval", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,

    #[serde(default = "defaults::per_page")]
    pub per_page: u32,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        envy::prefixed(PREFIX).from_env::<Config>().context(ConfigLoadSnafu)
    }

    pub fn progress(&self) -> ProgressSettings {
        ProgressSettings {
            window: self.window,
            jump_threshold: self.jump_threshold,
            poll_interval: self.poll_interval,
        }
    }

    pub fn assessment(&self) -> AssessmentSettings {
        AssessmentSettings {
            per_page: self.per_page.max(1),
        }
    }
}

/// Load `.env` (when present) and read the configuration from the environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    Config::from_env()
}

mod defaults {
    use std::path::PathBuf;
    use std::time::Duration;

    pub fn log_dir() -> PathBuf {
        PathBuf::from("logs")
    }

    pub fn cache_path() -> PathBuf {
        PathBuf::from(".coursetrack/progress.json")
    }

    pub fn window() -> Duration {
        Duration::from_millis(4000)
    }

    pub fn jump_threshold() -> Duration {
        Duration::from_millis(1500)
    }

    pub fn poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    pub fn per_page() -> u32 {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, envy::Error> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()));

        envy::from_iter::<_, Config>(vars)
    }

    #[test]
    fn empty_environment_uses_reference_timings() {
        let config = parse(&[]).unwrap();

        assert_eq!(config.window, Duration::from_secs(4));
        assert_eq!(config.jump_threshold, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.per_page, 5);
        assert!(config.script.is_none());
    }

    #[test]
    fn durations_are_read_as_humantime() {
        let config = parse(&[("window", "2s"), ("jump_threshold", "750ms")]).unwrap();

        assert_eq!(config.progress().window, Duration::from_secs(2));
        assert_eq!(config.progress().jump_threshold, Duration::from_millis(750));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(parse(&[("window", "soon")]).is_err());
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let config = parse(&[("per_page", "0")]).unwrap();
        assert_eq!(config.assessment().per_page, 1);
    }
}
