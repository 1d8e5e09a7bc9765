//! Medication reminders with recurrence rules. The cell never schedules
//! itself: a caller polls [`ReminderService::fire_due`] with the current time.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{CreateReminderRequest, FiredReminder, RecurrenceRule, Reminder, ReminderError};
pub use router::reminder_routes;
pub use services::ReminderService;
