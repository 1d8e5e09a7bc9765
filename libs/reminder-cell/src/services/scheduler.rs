use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use auth_cell::{AccessPolicy, Operation, ResourceOwner};
use shared_database::{encode_ts, is_storable_ts, opt_ts_column, ts_column, uuid_column, Database};
use shared_models::auth::AuthContext;
use shared_utils::notify::{notify_best_effort, Notification, NotificationChannel, NotificationSender};
use shared_utils::state::AppState;

use crate::models::{CreateReminderRequest, FiredReminder, RecurrenceRule, Reminder, ReminderError};

const REMINDER_COLUMNS: &str =
    "id, patient_id, medicine_name, notes, recurrence, next_fire_time, fired, last_fired_at, created_at";
const MAX_MEDICINE_NAME_CHARS: usize = 200;

// The rule column is returned raw and decoded by `decode`, so a bad rule
// surfaces as CorruptRule rather than a column conversion error.
fn map_reminder(row: &Row<'_>) -> rusqlite::Result<(Reminder, String)> {
    let raw_rule: String = row.get(4)?;
    Ok((
        Reminder {
            id: uuid_column(row, 0)?,
            patient_id: uuid_column(row, 1)?,
            medicine_name: row.get(2)?,
            notes: row.get(3)?,
            recurrence: RecurrenceRule::Once,
            next_fire_time: ts_column(row, 5)?,
            fired: row.get(6)?,
            last_fired_at: opt_ts_column(row, 7)?,
            created_at: ts_column(row, 8)?,
        },
        raw_rule,
    ))
}

fn decode(raw: (Reminder, String)) -> Result<Reminder, ReminderError> {
    let (mut reminder, raw_rule) = raw;
    reminder.recurrence = serde_json::from_str(&raw_rule)?;
    Ok(reminder)
}

fn find_reminder(conn: &Connection, id: Uuid) -> Result<Option<Reminder>, ReminderError> {
    conn.query_row(
        &format!("SELECT {} FROM reminders WHERE id = ?1", REMINDER_COLUMNS),
        [id.to_string()],
        map_reminder,
    )
    .optional()?
    .map(decode)
    .transpose()
}

/// A reminder claimed by this caller for one occurrence.
struct Claim {
    reminder: Reminder,
    occurrence: DateTime<Utc>,
    next_fire_time: Option<DateTime<Utc>>,
}

/// Take a reminder out of the queue for good. Used when its stored rule is
/// unreadable or it has no occurrence left that can be stored, so one bad
/// row never blocks the reminders behind it.
fn retire(conn: &Connection, id: &str, occurrence: &str, now: DateTime<Utc>) -> Result<usize, ReminderError> {
    let retired = conn.execute(
        "UPDATE reminders SET fired = 1, last_fired_at = ?1
         WHERE id = ?2 AND fired = 0 AND next_fire_time = ?3",
        params![encode_ts(&now), id, occurrence],
    )?;
    Ok(retired)
}

/// Claim the earliest due reminder. The update only applies while the row
/// still holds the occurrence we read, so concurrent pollers never fire the
/// same occurrence twice.
fn claim_next_due(db: &Database, now: DateTime<Utc>) -> Result<Option<Claim>, ReminderError> {
    db.with_conn(|conn| loop {
        let tx = conn.transaction()?;
        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {} FROM reminders
                     WHERE fired = 0 AND next_fire_time <= ?1
                     ORDER BY next_fire_time, id
                     LIMIT 1",
                    REMINDER_COLUMNS
                ),
                [encode_ts(&now)],
                map_reminder,
            )
            .optional()?;

        let Some(raw) = candidate else {
            return Ok(None);
        };
        let id = raw.0.id.to_string();
        let occurrence = raw.0.next_fire_time;

        let reminder = match decode(raw) {
            Ok(reminder) => reminder,
            Err(e) => {
                error!("Retiring reminder {}: {}", id, e);
                retire(&tx, &id, &encode_ts(&occurrence), now)?;
                tx.commit()?;
                continue;
            }
        };

        let next_fire_time = reminder.recurrence.advance(occurrence, now);
        let next_fire_time = match next_fire_time {
            Some(next) if !is_storable_ts(&next) => {
                warn!("Reminder {} has no storable occurrence after {}; marking it done", id, occurrence);
                None
            }
            other => other,
        };

        let claimed = tx.execute(
            "UPDATE reminders
             SET next_fire_time = COALESCE(?1, next_fire_time), fired = ?2, last_fired_at = ?3
             WHERE id = ?4 AND fired = 0 AND next_fire_time = ?5",
            params![
                next_fire_time.as_ref().map(encode_ts),
                next_fire_time.is_none(),
                encode_ts(&now),
                id,
                encode_ts(&occurrence)
            ],
        )?;
        tx.commit()?;

        if claimed == 1 {
            return Ok(Some(Claim {
                reminder,
                occurrence,
                next_fire_time,
            }));
        }
        debug!("Reminder {} was claimed elsewhere, retrying", id);
    })
}

fn reminder_message(reminder: &Reminder) -> String {
    match reminder.notes.as_deref() {
        Some(notes) => format!("Time to take {}. {}", reminder.medicine_name, notes),
        None => format!("Time to take {}.", reminder.medicine_name),
    }
}

pub struct ReminderService {
    db: Database,
    notifier: Arc<dyn NotificationSender>,
}

impl ReminderService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            notifier: Arc::clone(&state.notifier),
        }
    }

    pub fn create(&self, ctx: &AuthContext, request: CreateReminderRequest) -> Result<Reminder, ReminderError> {
        self.create_at(ctx, request, Utc::now())
    }

    #[instrument(skip(self, ctx, request), fields(patient_id = %ctx.user_id))]
    pub fn create_at(
        &self,
        ctx: &AuthContext,
        request: CreateReminderRequest,
        now: DateTime<Utc>,
    ) -> Result<Reminder, ReminderError> {
        AccessPolicy::authorize(ctx, Operation::ManageReminder, ResourceOwner::patient(ctx.user_id))?;

        let medicine_name = request.medicine_name.trim().to_string();
        if medicine_name.is_empty() {
            return Err(ReminderError::Validation("medicine name is required".to_string()));
        }
        if medicine_name.chars().count() > MAX_MEDICINE_NAME_CHARS {
            return Err(ReminderError::Validation(format!(
                "medicine name must be at most {} characters",
                MAX_MEDICINE_NAME_CHARS
            )));
        }
        request.recurrence.validate().map_err(ReminderError::Validation)?;
        if request.first_fire_time < now {
            return Err(ReminderError::Validation("first reminder time must not be in the past".to_string()));
        }
        if !is_storable_ts(&request.first_fire_time) {
            return Err(ReminderError::Validation("first reminder time must be before the year 10000".to_string()));
        }

        let notes = request.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let next_fire_time = request.recurrence.first_at_or_after(request.first_fire_time);
        if !is_storable_ts(&next_fire_time) {
            return Err(ReminderError::Validation("first reminder time must be before the year 10000".to_string()));
        }
        let rule = serde_json::to_string(&request.recurrence)?;
        let id = Uuid::new_v4();

        let reminder = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reminders (id, patient_id, medicine_name, notes, recurrence, next_fire_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    ctx.user_id.to_string(),
                    medicine_name,
                    notes,
                    rule,
                    encode_ts(&next_fire_time),
                    encode_ts(&now)
                ],
            )?;
            find_reminder(conn, id)?.ok_or(ReminderError::NotFound)
        })?;

        info!("Reminder {} set for {}", reminder.id, reminder.next_fire_time);
        Ok(reminder)
    }

    /// The caller's reminders, pending ones first in fire order.
    pub fn list(&self, ctx: &AuthContext) -> Result<Vec<Reminder>, ReminderError> {
        AccessPolicy::authorize(ctx, Operation::ManageReminder, ResourceOwner::patient(ctx.user_id))?;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reminders WHERE patient_id = ?1 ORDER BY fired, next_fire_time, id",
                REMINDER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([ctx.user_id.to_string()], map_reminder)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(decode)
                .collect()
        })
    }

    pub fn delete(&self, ctx: &AuthContext, id: Uuid) -> Result<(), ReminderError> {
        self.db.with_conn(|conn| {
            let reminder = find_reminder(conn, id)?.ok_or(ReminderError::NotFound)?;
            AccessPolicy::authorize(ctx, Operation::ManageReminder, ResourceOwner::patient(reminder.patient_id))?;
            conn.execute("DELETE FROM reminders WHERE id = ?1", [id.to_string()])?;
            Ok::<_, ReminderError>(())
        })?;
        info!("Reminder {} deleted", id);
        Ok(())
    }

    /// Every reminder due at `now`, fired one at a time as the stream is
    /// polled. The stream ends when nothing is due or after the first error.
    pub fn fire_due(&self, now: DateTime<Utc>) -> impl Stream<Item = Result<FiredReminder, ReminderError>> + Send + 'static {
        let db = self.db.clone();
        let notifier = Arc::clone(&self.notifier);

        stream::unfold(false, move |finished| {
            let db = db.clone();
            let notifier = Arc::clone(&notifier);
            async move {
                if finished {
                    return None;
                }

                let claim = match claim_next_due(&db, now) {
                    Ok(Some(claim)) => claim,
                    Ok(None) => return None,
                    Err(e) => {
                        error!("Failed to claim due reminder: {}", e);
                        return Some((Err(e), true));
                    }
                };

                let reminder = claim.reminder;
                let notified = notify_best_effort(
                    notifier.as_ref(),
                    Notification::new(reminder.patient_id, reminder_message(&reminder), NotificationChannel::InApp),
                )
                .await;

                debug!("Fired reminder {} for {}", reminder.id, claim.occurrence);
                Some((
                    Ok(FiredReminder {
                        reminder_id: reminder.id,
                        patient_id: reminder.patient_id,
                        medicine_name: reminder.medicine_name,
                        occurrence: claim.occurrence,
                        next_fire_time: claim.next_fire_time,
                        notified,
                    }),
                    false,
                ))
            }
        })
    }
}
