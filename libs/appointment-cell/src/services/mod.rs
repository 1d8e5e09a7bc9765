pub mod booking;
pub mod lifecycle;
pub mod telemedicine;

pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use telemedicine::TelemedicineService;
