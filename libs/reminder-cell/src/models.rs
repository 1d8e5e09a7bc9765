use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use auth_cell::PolicyError;
use shared_database::DatabaseError;
use shared_models::error::AppError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;
/// Longest allowed gap between two occurrences of an interval rule.
pub const MAX_INTERVAL_MINUTES: u32 = 366 * MINUTES_PER_DAY;

/// How a reminder repeats after each fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    Once,
    Interval { minutes: u32 },
    /// Same time of day, on each listed weekday.
    Weekdays { days: Vec<Weekday> },
}

impl RecurrenceRule {
    pub fn daily() -> Self {
        RecurrenceRule::Interval { minutes: MINUTES_PER_DAY }
    }

    pub fn weekly() -> Self {
        RecurrenceRule::Interval { minutes: MINUTES_PER_WEEK }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medicine_name: String,
    pub notes: Option<String>,
    pub recurrence: RecurrenceRule,
    pub next_fire_time: DateTime<Utc>,
    pub fired: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReminderRequest {
    pub medicine_name: String,
    pub notes: Option<String>,
    #[serde(default = "default_recurrence")]
    pub recurrence: RecurrenceRule,
    pub first_fire_time: DateTime<Utc>,
}

fn default_recurrence() -> RecurrenceRule {
    RecurrenceRule::Once
}

/// One occurrence delivered by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredReminder {
    pub reminder_id: Uuid,
    pub patient_id: Uuid,
    pub medicine_name: String,
    pub occurrence: DateTime<Utc>,
    /// `None` once a one-shot reminder is spent.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub notified: bool,
}

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Reminder not found")]
    NotFound,

    #[error("Stored recurrence rule is unreadable: {0}")]
    CorruptRule(#[from] serde_json::Error),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ReminderError {
    fn from(err: rusqlite::Error) -> Self {
        ReminderError::Database(DatabaseError::from(err))
    }
}

impl From<ReminderError> for AppError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::Validation(msg) => AppError::ValidationError(msg),
            ReminderError::NotFound => AppError::NotFound(err.to_string()),
            ReminderError::Policy(e) => AppError::Forbidden(e.to_string()),
            ReminderError::CorruptRule(e) => AppError::Internal(e.to_string()),
            ReminderError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
