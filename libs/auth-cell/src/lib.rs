//! Accounts, OTP sign-in, session tokens and the access policy every other
//! cell consults before acting on a caller's behalf.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{AccountError, User};
pub use router::auth_routes;
pub use services::policy::{AccessPolicy, Operation, PolicyError, ResourceOwner};
