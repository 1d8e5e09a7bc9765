use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::auth::Role;
use shared_models::error::AppError;

/// Public view of an account. Credential material never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub online: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary shown to patients choosing a doctor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSummary {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    pub online: bool,
}

impl From<User> for DoctorSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            specialty: user.specialty,
            online: user.online,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub password: String,
    pub password_confirm: String,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginChallenge {
    pub otp_required: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Email or phone already registered")]
    DuplicateIdentity,

    #[error("Invalid credentials")]
    InvalidCredential,

    #[error("Account is not registered as a {0}")]
    RoleMismatch(Role),

    #[error("Invalid or expired one-time password")]
    InvalidOtp,

    #[error("Account not found")]
    NotFound,

    #[error("Credential processing error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for AccountError {
    fn from(err: rusqlite::Error) -> Self {
        AccountError::Database(DatabaseError::from(err))
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(_) => AppError::ValidationError(err.to_string()),
            AccountError::DuplicateIdentity => AppError::Conflict(err.to_string()),
            AccountError::InvalidCredential
            | AccountError::RoleMismatch(_)
            | AccountError::InvalidOtp => AppError::Auth(err.to_string()),
            AccountError::NotFound => AppError::NotFound(err.to_string()),
            AccountError::Crypto(msg) => AppError::Internal(msg),
            AccountError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
