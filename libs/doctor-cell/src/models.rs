use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use auth_cell::{AccountError, PolicyError};
use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Open,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Open => "open",
            SlotStatus::Booked => "booked",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SlotStatus::Open),
            "booked" => Ok(SlotStatus::Booked),
            other => Err(format!("unknown slot status '{}'", other)),
        }
    }
}

/// A bookable interval `[start_time, end_time)` published by a doctor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSlotRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineStatusRequest {
    pub online: bool,
}

/// Query string for `GET /doctors/{id}/slots`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Half-open window on slot start times. `to = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl SlotRange {
    pub fn starting_at(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to: Some(to) }
    }
}

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Slot overlaps an existing slot")]
    Overlap,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Slot is booked; cancel the appointment first")]
    SlotBooked,

    #[error("Slot has appointment history and cannot be deleted")]
    SlotHasHistory,

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for AvailabilityError {
    fn from(err: rusqlite::Error) -> Self {
        AvailabilityError::Database(DatabaseError::from(err))
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::InvalidSlot(_) => AppError::ValidationError(err.to_string()),
            AvailabilityError::Overlap
            | AvailabilityError::SlotBooked
            | AvailabilityError::SlotHasHistory => AppError::Conflict(err.to_string()),
            AvailabilityError::SlotNotFound | AvailabilityError::DoctorNotFound => {
                AppError::NotFound(err.to_string())
            }
            AvailabilityError::Policy(e) => AppError::Forbidden(e.to_string()),
            AvailabilityError::Account(e) => AppError::from(e),
            AvailabilityError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
