pub mod availability;

pub use availability::{AvailabilityService, OpenSlots};
