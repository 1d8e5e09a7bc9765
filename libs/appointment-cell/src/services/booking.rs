use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use auth_cell::{AccessPolicy, Operation, ResourceOwner};
use doctor_cell::services::availability::find_slot;
use doctor_cell::AvailabilityError;
use shared_database::{encode_ts, is_unique_violation, parsed_column, ts_column, uuid_column, Database};
use shared_models::auth::AuthContext;
use shared_utils::notify::{notify_best_effort, Notification, NotificationChannel, NotificationSender};
use shared_utils::state::AppState;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, VideoSession};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::telemedicine::{room_name_for, TelemedicineService};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, slot_id, scheduled_start, scheduled_end, \
     status, room_name, cancellation_reason, created_at, updated_at";

fn map_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: uuid_column(row, 0)?,
        patient_id: uuid_column(row, 1)?,
        doctor_id: uuid_column(row, 2)?,
        slot_id: uuid_column(row, 3)?,
        scheduled_start: ts_column(row, 4)?,
        scheduled_end: ts_column(row, 5)?,
        status: parsed_column(row, 6)?,
        room_name: row.get(7)?,
        cancellation_reason: row.get(8)?,
        created_at: ts_column(row, 9)?,
        updated_at: ts_column(row, 10)?,
    })
}

fn find_appointment(conn: &Connection, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
    let appointment = conn
        .query_row(
            &format!("SELECT {} FROM appointments WHERE id = ?1", APPOINTMENT_COLUMNS),
            [id.to_string()],
            map_appointment,
        )
        .optional()?;
    Ok(appointment)
}

fn slot_lookup_error(err: AvailabilityError) -> AppointmentError {
    match err {
        AvailabilityError::Database(e) => AppointmentError::Database(e),
        _ => AppointmentError::SlotNotFound,
    }
}

fn owner_of(appointment: &Appointment) -> ResourceOwner {
    ResourceOwner::shared(appointment.patient_id, appointment.doctor_id)
}

/// The Appointment Ledger. Every status change is a compare-and-swap on the
/// stored status, so two racing callers can never both win.
pub struct BookingService {
    db: Database,
    notifier: Arc<dyn NotificationSender>,
    lifecycle: AppointmentLifecycleService,
    telemedicine: TelemedicineService,
}

impl BookingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            notifier: Arc::clone(&state.notifier),
            lifecycle: AppointmentLifecycleService::new(),
            telemedicine: TelemedicineService::new(state.config.jitsi_domain.clone()),
        }
    }

    pub async fn book(&self, ctx: &AuthContext, slot_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.book_at(ctx, slot_id, Utc::now()).await
    }

    #[instrument(skip(self, ctx), fields(patient_id = %ctx.user_id))]
    pub async fn book_at(
        &self,
        ctx: &AuthContext,
        slot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        AccessPolicy::authorize(ctx, Operation::BookAppointment, ResourceOwner::patient(ctx.user_id))?;

        let appointment = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let slot = find_slot(&tx, slot_id)
                .map_err(slot_lookup_error)?
                .ok_or(AppointmentError::SlotNotFound)?;

            let claimed = tx.execute(
                "UPDATE availability_slots SET status = 'booked'
                 WHERE id = ?1 AND status = 'open' AND start_time > ?2
                   AND doctor_id IN (SELECT id FROM users WHERE is_active = 1)",
                params![slot_id.to_string(), encode_ts(&now)],
            )?;
            if claimed != 1 {
                debug!("Slot {} could not be claimed", slot_id);
                return Err(AppointmentError::SlotUnavailable);
            }

            let id = Uuid::new_v4();
            tx.execute(
                &format!(
                    "INSERT INTO appointments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'requested', ?7, NULL, ?8, ?8)",
                    APPOINTMENT_COLUMNS
                ),
                params![
                    id.to_string(),
                    ctx.user_id.to_string(),
                    slot.doctor_id.to_string(),
                    slot_id.to_string(),
                    encode_ts(&slot.start_time),
                    encode_ts(&slot.end_time),
                    room_name_for(id),
                    encode_ts(&now)
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppointmentError::SlotUnavailable
                } else {
                    AppointmentError::from(e)
                }
            })?;

            let appointment = find_appointment(&tx, id)?.ok_or(AppointmentError::NotFound)?;
            tx.commit()?;
            Ok(appointment)
        })?;

        info!(
            "Appointment {} requested by patient {} with doctor {}",
            appointment.id, appointment.patient_id, appointment.doctor_id
        );
        self.notify(
            appointment.doctor_id,
            format!(
                "New appointment request for {}.",
                appointment.scheduled_start.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .await;

        Ok(appointment)
    }

    pub async fn confirm(&self, ctx: &AuthContext, id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.transition(ctx, id, Operation::ConfirmAppointment, AppointmentStatus::Confirmed, None)?;
        self.notify(
            appointment.patient_id,
            format!(
                "Your appointment on {} has been confirmed.",
                appointment.scheduled_start.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .await;
        Ok(appointment)
    }

    /// Either participant may cancel; the slot goes back on offer.
    pub async fn cancel(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let appointment = self.transition(ctx, id, Operation::CancelAppointment, AppointmentStatus::Cancelled, reason)?;

        let counterpart = if ctx.is_patient() {
            appointment.doctor_id
        } else {
            appointment.patient_id
        };
        let mut message = format!(
            "The appointment on {} was cancelled by the {}.",
            appointment.scheduled_start.format("%Y-%m-%d %H:%M UTC"),
            ctx.role
        );
        if let Some(reason) = &appointment.cancellation_reason {
            message.push_str(&format!(" Reason: {}", reason));
        }
        self.notify(counterpart, message).await;

        Ok(appointment)
    }

    pub fn complete(&self, ctx: &AuthContext, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, id, Operation::CompleteAppointment, AppointmentStatus::Completed, None)
    }

    pub fn get(&self, ctx: &AuthContext, id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .db
            .with_conn(|conn| find_appointment(conn, id))?
            .ok_or(AppointmentError::NotFound)?;
        AccessPolicy::authorize(ctx, Operation::ViewAppointment, owner_of(&appointment))?;
        Ok(appointment)
    }

    /// The caller's own appointments in schedule order, optionally filtered.
    pub fn list_for(
        &self,
        ctx: &AuthContext,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let owner_column = if ctx.is_doctor() { "doctor_id" } else { "patient_id" };
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM appointments
                 WHERE {} = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY scheduled_start, id",
                APPOINTMENT_COLUMNS, owner_column
            ))?;
            let appointments = stmt
                .query_map(
                    params![ctx.user_id.to_string(), status.map(|s| s.as_str())],
                    map_appointment,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(appointments)
        })
    }

    pub fn video_session(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<VideoSession, AppointmentError> {
        let appointment = self
            .db
            .with_conn(|conn| find_appointment(conn, id))?
            .ok_or(AppointmentError::NotFound)?;
        AccessPolicy::authorize(ctx, Operation::JoinVideo, owner_of(&appointment))?;
        self.telemedicine.video_session(&appointment, now)
    }

    #[instrument(skip(self, ctx, reason), fields(user_id = %ctx.user_id))]
    fn transition(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        operation: Operation,
        target: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current = find_appointment(&tx, id)?.ok_or(AppointmentError::NotFound)?;
            AccessPolicy::authorize(ctx, operation, owner_of(&current))?;
            self.lifecycle.validate_status_transition(current.status, target)?;

            let now = encode_ts(&Utc::now());
            let swapped = tx.execute(
                "UPDATE appointments
                 SET status = ?1, cancellation_reason = COALESCE(?2, cancellation_reason), updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![target.as_str(), reason, now, id.to_string(), current.status.as_str()],
            )?;
            if swapped != 1 {
                let latest = find_appointment(&tx, id)?.ok_or(AppointmentError::NotFound)?;
                warn!("Lost status race on appointment {}: now {}", id, latest.status);
                return Err(AppointmentError::InvalidStatusTransition {
                    from: latest.status,
                    to: target,
                });
            }

            if target == AppointmentStatus::Cancelled {
                tx.execute(
                    "UPDATE availability_slots SET status = 'open' WHERE id = ?1 AND status = 'booked'",
                    [current.slot_id.to_string()],
                )?;
            }

            let updated = find_appointment(&tx, id)?.ok_or(AppointmentError::NotFound)?;
            tx.commit()?;
            Ok(updated)
        })?;

        info!("Appointment {} is now {}", appointment.id, appointment.status);
        Ok(appointment)
    }

    async fn notify(&self, recipient: Uuid, message: String) {
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(recipient, message, NotificationChannel::InApp),
        )
        .await;
    }
}
