//! Appointment Ledger: booking against published slots, the status state
//! machine and the video room for each visit.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{Appointment, AppointmentError, AppointmentStatus, VideoSession};
pub use router::appointment_routes;
pub use services::BookingService;
