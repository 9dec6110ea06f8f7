use std::time::Duration;

use chrono::Utc;

pub type Timestamp = chrono::DateTime<Utc>;

/// Source of wall-clock time for cache entries.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(Timestamp),
}

impl Clock {
    pub fn fixed(at: Timestamp) -> Self {
        Self::Fixed(at)
    }

    pub fn now(&self) -> Timestamp {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Build a timer that first ticks one `period` from now and skips ticks it could not keep up with.
pub fn poll_timer(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;

    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer
}

/// Parse a humantime duration (`4s`, `1500ms`) from a config value.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text = <String as serde::Deserialize>::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_millis() {
        let at = chrono::DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Clock::fixed(at);

        assert_eq!(clock.now(), at);
        assert_eq!(clock.now_millis(), 1_700_000_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timer_waits_a_full_period_before_the_first_tick() {
        let started = tokio::time::Instant::now();
        let mut timer = poll_timer(Duration::from_secs(1));

        let first = timer.tick().await;
        assert_eq!(first - started, Duration::from_secs(1));

        let second = timer.tick().await;
        assert_eq!(second - first, Duration::from_secs(1));
    }
}
