use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::models::{Appointment, VideoSession};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Room names are derived from the appointment id, so the same appointment
/// always maps to the same Jitsi room.
pub fn room_name_for(appointment_id: Uuid) -> String {
    format!("telemed-{}", appointment_id.simple())
}

pub struct TelemedicineService {
    domain: String,
    lifecycle: AppointmentLifecycleService,
}

impl TelemedicineService {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    pub fn join_url(&self, room_name: &str) -> String {
        format!("https://{}/{}", self.domain.trim_end_matches('/'), room_name)
    }

    /// Caller must already be authorized as a participant.
    pub fn video_session(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<VideoSession, crate::models::AppointmentError> {
        self.lifecycle
            .can_join_video(appointment.status, appointment.scheduled_start, now)?;

        let (opens_at, closes_at) = self.lifecycle.join_window(appointment.scheduled_start);
        info!("Video session issued for appointment {}", appointment.id);

        Ok(VideoSession {
            appointment_id: appointment.id,
            room_name: appointment.room_name.clone(),
            domain: self.domain.clone(),
            join_url: self.join_url(&appointment.room_name),
            opens_at,
            closes_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_is_stable_and_url_safe() {
        let id = Uuid::new_v4();
        let room = room_name_for(id);

        assert_eq!(room, room_name_for(id));
        assert!(room.starts_with("telemed-"));
        assert!(room.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn join_url_uses_domain() {
        let service = TelemedicineService::new("meet.example.org/");
        assert_eq!(service.join_url("telemed-abc"), "https://meet.example.org/telemed-abc");
    }
}
