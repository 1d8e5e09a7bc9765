//! Patient-facing symptom checker backed by an external diagnosis API.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{SymptomCheckRequest, SymptomCheckResponse, SymptomCheckerError};
pub use router::symptom_routes;
pub use services::SymptomCheckerService;
