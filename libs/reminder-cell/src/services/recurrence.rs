//! Occurrence arithmetic for [`RecurrenceRule`]. Pure functions of their
//! inputs; the scheduler supplies the clock.

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::models::{RecurrenceRule, MAX_INTERVAL_MINUTES};

impl RecurrenceRule {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RecurrenceRule::Once => Ok(()),
            RecurrenceRule::Interval { minutes: 0 } => Err("interval must be at least one minute".to_string()),
            RecurrenceRule::Interval { minutes } if *minutes > MAX_INTERVAL_MINUTES => Err(format!(
                "interval must be at most {} minutes",
                MAX_INTERVAL_MINUTES
            )),
            RecurrenceRule::Interval { .. } => Ok(()),
            RecurrenceRule::Weekdays { days } if days.is_empty() => {
                Err("at least one weekday is required".to_string())
            }
            RecurrenceRule::Weekdays { .. } => Ok(()),
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, RecurrenceRule::Once)
    }

    /// First occurrence strictly after `occurrence`. `None` for one-shots and
    /// when the next occurrence is past the end of the calendar.
    pub fn next_after(&self, occurrence: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceRule::Once => None,
            RecurrenceRule::Interval { minutes } => {
                occurrence.checked_add_signed(Duration::minutes(i64::from(*minutes)))
            }
            RecurrenceRule::Weekdays { days } => (1..=7)
                .map_while(|offset| occurrence.checked_add_signed(Duration::days(offset)))
                .find(|candidate| days.contains(&candidate.weekday())),
        }
    }

    /// First time the rule matches at or after `start`. Weekday rules move a
    /// start on an unlisted day forward to the next listed one.
    pub fn first_at_or_after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RecurrenceRule::Weekdays { days } if !days.contains(&start.weekday()) => {
                self.next_after(start).unwrap_or(start)
            }
            _ => start,
        }
    }

    /// Next occurrence after the one that just fired, skipping any that are
    /// already at or before `now`. `None` once the rule has nothing left.
    pub fn advance(&self, fired: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceRule::Once => None,
            RecurrenceRule::Interval { minutes } => {
                let step = Duration::minutes(i64::from(*minutes));
                let mut next = fired.checked_add_signed(step)?;
                if next <= now {
                    let missed = (now - next).num_minutes() / i64::from(*minutes);
                    next = next.checked_add_signed(Duration::minutes(missed.checked_mul(i64::from(*minutes))?))?;
                    while next <= now {
                        next = next.checked_add_signed(step)?;
                    }
                }
                Some(next)
            }
            RecurrenceRule::Weekdays { .. } => {
                let mut next = self.next_after(fired)?;
                if next <= now {
                    let whole_weeks = (now - next).num_weeks();
                    next = next.checked_add_signed(Duration::weeks(whole_weeks))?;
                    while next <= now {
                        next = self.next_after(next)?;
                    }
                }
                Some(next)
            }
        }
    }
}
