//! Doctor availability: published slots, online presence and the lazy
//! open-slot listing patients browse before booking.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{AvailabilityError, AvailabilitySlot, SlotRange, SlotStatus};
pub use router::doctor_routes;
pub use services::{AvailabilityService, OpenSlots};
