//! Background driver for the reminder scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use reminder_cell::ReminderService;
use shared_utils::state::AppState;

/// Fire everything due at `now`. Returns how many reminders fired.
pub async fn drain_due_reminders(state: &AppState, now: DateTime<Utc>) -> usize {
    let mut due = Box::pin(ReminderService::new(state).fire_due(now));
    let mut fired = 0;

    while let Some(result) = due.next().await {
        match result {
            Ok(reminder) => {
                fired += 1;
                debug!(
                    "Reminder {} fired for patient {} (notified: {})",
                    reminder.reminder_id, reminder.patient_id, reminder.notified
                );
            }
            Err(e) => error!("Reminder tick failed: {}", e),
        }
    }

    fired
}

pub async fn run_reminder_ticker(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Reminder ticker running every {:?}", period);

    loop {
        ticker.tick().await;
        let fired = drain_due_reminders(&state, Utc::now()).await;
        if fired > 0 {
            info!("Fired {} reminders", fired);
        }
    }
}
