pub mod recurrence;
pub mod scheduler;

pub use scheduler::ReminderService;
