//! Reminder definitions and their due-time rules.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest period, dedup window or countdown a definition may carry.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

fn delta_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Meal,
    Medication,
    Hydration,
    Exercise,
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReminderKind::Meal => "meal",
            ReminderKind::Medication => "medication",
            ReminderKind::Hydration => "hydration",
            ReminderKind::Exercise => "exercise",
        };
        f.write_str(s)
    }
}

/// When a definition comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReminderSchedule {
    /// Once a day at a local wall-clock time.
    Daily { hour: u32, minute: u32 },
    /// Repeatedly, this many seconds after it was last raised or shown.
    Every { seconds: u64 },
}

fn default_dedup_window_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub title: String,
    pub message: String,
    pub schedule: ReminderSchedule,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// Overrides the scheduler-wide reminder countdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_secs: Option<u64>,
}

impl ReminderDefinition {
    pub fn daily(
        key: &str,
        kind: ReminderKind,
        hour: u32,
        minute: u32,
        title: &str,
        message: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            schedule: ReminderSchedule::Daily { hour, minute },
            dedup_window_secs: default_dedup_window_secs(),
            countdown_secs: None,
        }
    }

    pub fn every(key: &str, kind: ReminderKind, seconds: u64, title: &str, message: &str) -> Self {
        Self {
            schedule: ReminderSchedule::Every { seconds },
            ..Self::daily(key, kind, 0, 0, title, message)
        }
    }

    pub fn with_dedup_window(mut self, secs: u64) -> Self {
        self.dedup_window_secs = secs;
        self
    }

    pub fn with_countdown(mut self, secs: u64) -> Self {
        self.countdown_secs = Some(secs);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("key", &self.key)?;
        ValidationError::require("title", &self.title)?;
        match self.schedule {
            ReminderSchedule::Daily { hour, minute } if hour > 23 || minute > 59 => {
                Err(ValidationError::InvalidValue {
                    field: format!("{}.schedule", self.key),
                    message: format!("{hour:02}:{minute:02} is not a time of day"),
                })
            }
            ReminderSchedule::Every { seconds: 0 } => Err(ValidationError::InvalidValue {
                field: format!("{}.schedule", self.key),
                message: "period must be positive".into(),
            }),
            ReminderSchedule::Every { seconds } => {
                within_limit(format!("{}.schedule", self.key), seconds)
            }
            _ => Ok(()),
        }?;
        within_limit(format!("{}.dedup_window_secs", self.key), self.dedup_window_secs)?;
        match self.countdown_secs {
            Some(secs) => within_limit(format!("{}.countdown_secs", self.key), secs),
            None => Ok(()),
        }
    }

    /// Today's due instant for a daily definition, in the given offset.
    pub fn due_at(&self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let ReminderSchedule::Daily { hour, minute } = self.schedule else {
            return None;
        };
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let local_date = now.with_timezone(&offset).date_naive();
        offset
            .from_local_datetime(&local_date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// True while `now` is no more than `dedup_window_secs` after `last_shown`.
    pub fn in_dedup_window(&self, now: DateTime<Utc>, last_shown: Option<DateTime<Utc>>) -> bool {
        let window = delta_secs(self.dedup_window_secs);
        last_shown.is_some_and(|shown| now - shown <= window)
    }

    /// Whether this definition should be raised at `now`.
    ///
    /// `last_shown` is the last time a reminder of this kind was shown,
    /// acknowledged or dismissed; nothing is due while `now` is within the
    /// dedup window of it. `last_raised` is when this definition last went
    /// pending.
    pub fn is_due(
        &self,
        now: DateTime<Utc>,
        last_shown: Option<DateTime<Utc>>,
        last_raised: Option<DateTime<Utc>>,
        offset: FixedOffset,
    ) -> bool {
        if self.in_dedup_window(now, last_shown) {
            return false;
        }
        match self.schedule {
            ReminderSchedule::Daily { .. } => match self.due_at(now, offset) {
                Some(due) => now >= due && last_raised.map_or(true, |raised| raised < due),
                None => false,
            },
            ReminderSchedule::Every { seconds } => {
                let period = delta_secs(seconds);
                let last = last_raised.max(last_shown);
                last.map_or(true, |last| now - last >= period)
            }
        }
    }
}

fn within_limit(field: String, secs: u64) -> Result<(), ValidationError> {
    if secs > MAX_INTERVAL_SECS {
        return Err(ValidationError::InvalidValue {
            field,
            message: format!("{secs}s is longer than {MAX_INTERVAL_SECS}s"),
        });
    }
    Ok(())
}

/// Lunch, medication, hydration and exercise reminders through the afternoon.
pub fn default_catalog() -> Vec<ReminderDefinition> {
    vec![
        ReminderDefinition::daily(
            "lunch",
            ReminderKind::Meal,
            12,
            0,
            "Lunch Time!",
            "Have you had your lunch today? It's important to maintain regular meal times.",
        ),
        ReminderDefinition::daily(
            "medication",
            ReminderKind::Medication,
            14,
            0,
            "Medication Reminder",
            "Time for your afternoon medication. Please take it with water.",
        ),
        ReminderDefinition::daily(
            "water",
            ReminderKind::Hydration,
            15,
            0,
            "Stay Hydrated",
            "Remember to drink water regularly. Have you had enough water today?",
        ),
        ReminderDefinition::daily(
            "exercise",
            ReminderKind::Exercise,
            16,
            0,
            "Light Exercise",
            "Time for some light stretching or a short walk. Keep your body active!",
        ),
    ]
}
