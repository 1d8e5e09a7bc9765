use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Participants may join from this long before the start...
pub const JOIN_OPENS_BEFORE_MINUTES: i64 = 15;
/// ...until this long after it.
pub const JOIN_CLOSES_AFTER_MINUTES: i64 = 60;

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Requested => vec![AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => vec![AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => vec![],
        }
    }

    /// States from which `target` can be reached in one step.
    pub fn sources_of(&self, target: AppointmentStatus) -> Vec<AppointmentStatus> {
        [
            AppointmentStatus::Requested,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
        ]
        .into_iter()
        .filter(|from| self.get_valid_transitions(*from).contains(&target))
        .collect()
    }

    /// Window `[start - 15 min, start + 60 min]` during which the video room
    /// may be joined.
    pub fn join_window(&self, scheduled_start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            scheduled_start - Duration::minutes(JOIN_OPENS_BEFORE_MINUTES),
            scheduled_start + Duration::minutes(JOIN_CLOSES_AFTER_MINUTES),
        )
    }

    pub fn can_join_video(
        &self,
        current_status: AppointmentStatus,
        scheduled_start: DateTime<Utc>,
        current_time: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if current_status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::VideoUnavailable(format!(
                "appointment is {}",
                current_status
            )));
        }

        let (opens_at, closes_at) = self.join_window(scheduled_start);
        if current_time < opens_at {
            return Err(AppointmentError::VideoUnavailable(format!(
                "room opens at {}",
                opens_at.format("%Y-%m-%d %H:%M UTC")
            )));
        }
        if current_time > closes_at {
            return Err(AppointmentError::VideoUnavailable("session window has closed".to_string()));
        }
        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
