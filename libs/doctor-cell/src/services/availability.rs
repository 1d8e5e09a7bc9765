use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use auth_cell::models::DoctorSummary;
use auth_cell::services::AccountService;
use auth_cell::{AccessPolicy, AccountError, Operation, ResourceOwner};
use shared_database::{encode_ts, is_storable_ts, parsed_column, ts_column, uuid_column, Database};
use shared_models::auth::AuthContext;
use shared_utils::state::AppState;

use crate::models::{AvailabilityError, AvailabilitySlot, SlotRange, SlotStatus};

pub const MIN_SLOT_MINUTES: i64 = 30;
pub const DEFAULT_PAGE_SIZE: usize = 50;

const SLOT_COLUMNS: &str = "id, doctor_id, start_time, end_time, status, created_at";

fn map_slot(row: &Row<'_>) -> rusqlite::Result<AvailabilitySlot> {
    Ok(AvailabilitySlot {
        id: uuid_column(row, 0)?,
        doctor_id: uuid_column(row, 1)?,
        start_time: ts_column(row, 2)?,
        end_time: ts_column(row, 3)?,
        status: parsed_column(row, 4)?,
        created_at: ts_column(row, 5)?,
    })
}

pub fn find_slot(conn: &Connection, id: Uuid) -> Result<Option<AvailabilitySlot>, AvailabilityError> {
    let slot = conn
        .query_row(
            &format!("SELECT {} FROM availability_slots WHERE id = ?1", SLOT_COLUMNS),
            [id.to_string()],
            map_slot,
        )
        .optional()?;
    Ok(slot)
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AvailabilityError> {
    if start >= end {
        return Err(AvailabilityError::InvalidSlot("start time must be before end time".to_string()));
    }
    if end - start < Duration::minutes(MIN_SLOT_MINUTES) {
        return Err(AvailabilityError::InvalidSlot(format!(
            "slot must be at least {} minutes long",
            MIN_SLOT_MINUTES
        )));
    }
    if end <= now {
        return Err(AvailabilityError::InvalidSlot("slot must end in the future".to_string()));
    }
    if !is_storable_ts(&start) || !is_storable_ts(&end) {
        return Err(AvailabilityError::InvalidSlot("slot must fall before the year 10000".to_string()));
    }
    Ok(())
}

pub struct AvailabilityService {
    db: Database,
    accounts: AccountService,
}

impl AvailabilityService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            accounts: AccountService::new(state),
        }
    }

    pub fn publish_slot(
        &self,
        ctx: &AuthContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        self.publish_slot_at(ctx, start, end, Utc::now())
    }

    #[instrument(skip(self, ctx), fields(doctor_id = %ctx.user_id))]
    pub fn publish_slot_at(
        &self,
        ctx: &AuthContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        AccessPolicy::authorize(ctx, Operation::PublishSlot, ResourceOwner::doctor(ctx.user_id))?;
        validate_window(start, end, now)?;

        let id = Uuid::new_v4();
        let slot = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;

            let overlaps: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM availability_slots
                     WHERE doctor_id = ?1 AND start_time < ?3 AND end_time > ?2
                 )",
                params![ctx.user_id.to_string(), encode_ts(&start), encode_ts(&end)],
                |row| row.get(0),
            )?;
            if overlaps {
                return Err(AvailabilityError::Overlap);
            }

            tx.execute(
                "INSERT INTO availability_slots (id, doctor_id, start_time, end_time, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'open', ?5)",
                params![
                    id.to_string(),
                    ctx.user_id.to_string(),
                    encode_ts(&start),
                    encode_ts(&end),
                    encode_ts(&now)
                ],
            )?;

            let slot = find_slot(&tx, id)?.ok_or(AvailabilityError::SlotNotFound)?;
            tx.commit()?;
            Ok(slot)
        })?;

        info!("Doctor {} published slot {} ({} - {})", ctx.user_id, slot.id, slot.start_time, slot.end_time);
        Ok(slot)
    }

    /// Remove one of the caller's open slots. Booked slots must be cancelled
    /// first, and a slot that ever carried an appointment stays on record.
    #[instrument(skip(self, ctx), fields(doctor_id = %ctx.user_id))]
    pub fn delete_slot(&self, ctx: &AuthContext, slot_id: Uuid) -> Result<(), AvailabilityError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let slot = find_slot(&tx, slot_id)?.ok_or(AvailabilityError::SlotNotFound)?;
            AccessPolicy::authorize(ctx, Operation::DeleteSlot, ResourceOwner::doctor(slot.doctor_id))?;

            if slot.status == SlotStatus::Booked {
                return Err(AvailabilityError::SlotBooked);
            }

            let has_history: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM appointments WHERE slot_id = ?1)",
                [slot_id.to_string()],
                |row| row.get(0),
            )?;
            if has_history {
                return Err(AvailabilityError::SlotHasHistory);
            }

            let deleted = tx.execute(
                "DELETE FROM availability_slots WHERE id = ?1 AND status = 'open'",
                [slot_id.to_string()],
            )?;
            if deleted != 1 {
                return Err(AvailabilityError::SlotBooked);
            }
            tx.commit()?;
            Ok(())
        })?;

        info!("Doctor {} deleted slot {}", ctx.user_id, slot_id);
        Ok(())
    }

    pub fn set_online_status(&self, ctx: &AuthContext, online: bool) -> Result<DoctorSummary, AvailabilityError> {
        AccessPolicy::authorize(ctx, Operation::SetOnlineStatus, ResourceOwner::doctor(ctx.user_id))?;
        let user = self.accounts.set_online(ctx.user_id, online)?;
        debug!("Doctor {} is now {}", user.id, if user.online { "online" } else { "offline" });
        Ok(user.into())
    }

    pub fn toggle_online_status(&self, ctx: &AuthContext) -> Result<DoctorSummary, AvailabilityError> {
        AccessPolicy::authorize(ctx, Operation::SetOnlineStatus, ResourceOwner::doctor(ctx.user_id))?;
        Ok(self.accounts.toggle_online(ctx.user_id)?.into())
    }

    pub fn list_online_doctors(&self) -> Result<Vec<DoctorSummary>, AvailabilityError> {
        let doctors = self.accounts.list_online_doctors()?;
        Ok(doctors.into_iter().map(DoctorSummary::from).collect())
    }

    /// Open slots of an active doctor starting inside `range`. Nothing is
    /// read until the result is iterated.
    pub fn list_open_slots(&self, doctor_id: Uuid, range: SlotRange) -> Result<OpenSlots, AvailabilityError> {
        self.accounts.get_doctor(doctor_id).map_err(|e| match e {
            AccountError::NotFound => AvailabilityError::DoctorNotFound,
            other => AvailabilityError::Account(other),
        })?;
        Ok(OpenSlots {
            db: self.db.clone(),
            doctor_id,
            range,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Every slot the calling doctor owns, in start order.
    pub fn list_own_slots(&self, ctx: &AuthContext) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        AccessPolicy::authorize(ctx, Operation::PublishSlot, ResourceOwner::doctor(ctx.user_id))?;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM availability_slots WHERE doctor_id = ?1 ORDER BY start_time, id",
                SLOT_COLUMNS
            ))?;
            let slots = stmt
                .query_map([ctx.user_id.to_string()], map_slot)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(slots)
        })
    }
}

/// Lazy view over a doctor's open slots, ordered by `(start_time, id)` and
/// read in keyset pages. Each call to [`OpenSlots::iter`] starts over.
#[derive(Clone)]
pub struct OpenSlots {
    db: Database,
    doctor_id: Uuid,
    range: SlotRange,
    page_size: usize,
}

impl OpenSlots {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn iter(&self) -> OpenSlotsIter {
        OpenSlotsIter {
            slots: self.clone(),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    fn fetch_page(&self, cursor: Option<&(String, String)>) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        let from = encode_ts(&self.range.from);
        let to = self.range.to.as_ref().map(encode_ts);
        let (after_start, after_id) = match cursor {
            Some((start, id)) => (Some(start.as_str()), Some(id.as_str())),
            None => (None, None),
        };

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM availability_slots
                 WHERE doctor_id = ?1 AND status = 'open'
                   AND start_time >= ?2
                   AND (?3 IS NULL OR start_time < ?3)
                   AND (?4 IS NULL OR (start_time, id) > (?4, ?5))
                 ORDER BY start_time, id
                 LIMIT ?6",
                SLOT_COLUMNS
            ))?;
            let page = stmt
                .query_map(
                    params![
                        self.doctor_id.to_string(),
                        from,
                        to,
                        after_start,
                        after_id,
                        self.page_size as i64
                    ],
                    map_slot,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(page)
        })
    }
}

impl fmt::Debug for OpenSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenSlots")
            .field("doctor_id", &self.doctor_id)
            .field("range", &self.range)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a OpenSlots {
    type Item = Result<AvailabilitySlot, AvailabilityError>;
    type IntoIter = OpenSlotsIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct OpenSlotsIter {
    slots: OpenSlots,
    buffer: VecDeque<AvailabilitySlot>,
    cursor: Option<(String, String)>,
    exhausted: bool,
}

impl Iterator for OpenSlotsIter {
    type Item = Result<AvailabilitySlot, AvailabilityError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.slots.fetch_page(self.cursor.as_ref()) {
                Ok(page) => {
                    if page.len() < self.slots.page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some((encode_ts(&last.start_time), last.id.to_string()));
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
