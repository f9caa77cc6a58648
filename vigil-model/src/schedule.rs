use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{OwnerId, ScheduleId};

/// Recurrence period of a schedule. Seconds and months are mutually
/// exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePeriod {
    Seconds(u64),
    Months(u32),
}

/// A recurrence rule attached to a task: first occurrence plus an optional
/// period, optionally bounded by a duration window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub owner: OwnerId,
    pub name: String,
    /// First occurrence, stored in UTC.
    pub first_time: DateTime<Utc>,
    /// Absent means the schedule fires once and is then disabled.
    pub period: Option<RecurrencePeriod>,
    /// Window in seconds after each occurrence during which a start is still
    /// worth performing. A start due past this window is skipped.
    pub duration: Option<u64>,
    /// Offset of the schedule's timezone from UTC, in seconds. Applied when
    /// the duration window is evaluated against local wall time.
    pub utc_offset_secs: i32,
    /// Next due instant, advanced by the scheduler on every fire. `None`
    /// means disabled (a one-shot schedule that has already fired).
    pub next_time: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn once(owner: OwnerId, name: impl Into<String>, first_time: DateTime<Utc>) -> Self {
        Self {
            id: ScheduleId::new(),
            owner,
            name: name.into(),
            first_time,
            period: None,
            duration: None,
            utc_offset_secs: 0,
            next_time: Some(first_time),
        }
    }

    pub fn with_period(mut self, period: RecurrencePeriod) -> Result<Self, ModelError> {
        match period {
            RecurrencePeriod::Seconds(0) => Err(ModelError::InvalidSchedule(
                "seconds period must be positive".to_string(),
            )),
            RecurrencePeriod::Months(0) => Err(ModelError::InvalidSchedule(
                "months period must be positive".to_string(),
            )),
            period => {
                self.period = Some(period);
                Ok(self)
            }
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_utc_offset(mut self, seconds: i32) -> Self {
        self.utc_offset_secs = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_periods_are_rejected() {
        let schedule = Schedule::once(OwnerId::new(), "nightly", Utc::now());
        assert!(schedule
            .clone()
            .with_period(RecurrencePeriod::Seconds(0))
            .is_err());
        assert!(schedule.with_period(RecurrencePeriod::Months(0)).is_err());
    }
}
