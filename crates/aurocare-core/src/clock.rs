//! Wall-clock timestamps that advance with the tokio timer.
//!
//! Every timestamp the core records (alert creation, dispatch, acknowledgment,
//! reminder due times) comes from a [`Clock`]. It is anchored once to a UTC
//! instant and then advanced by tokio's monotonic `Instant`, so timestamps and
//! `sleep`/`interval` deadlines never disagree. Under a paused tokio runtime
//! the clock moves only when the test advances time.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    /// Clock anchored to the current system time.
    pub fn system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock that reads `at` right now and advances from there.
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: at,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_utc + elapsed
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn advances_with_tokio_time() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 11, 59, 0).unwrap();
        let clock = Clock::starting_at(start);
        assert_eq!(clock.now(), start);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }
}
