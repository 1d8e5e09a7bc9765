use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use auth_cell::PolicyError;
use shared_models::error::AppError;

pub const DEFAULT_AGE: u32 = 30;
pub const DEFAULT_GENDER: &str = "prefer not to say";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomCheckRequest {
    pub symptoms: Vec<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientInfo {
    pub age: u32,
    pub gender: String,
}

/// Body sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequest {
    pub symptoms: Vec<String>,
    pub patient_info: PatientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomCheckResponse {
    pub result: Value,
    pub checked_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SymptomCheckerError {
    #[error("At least one symptom is required")]
    NoSymptoms,

    #[error("Symptom checker unavailable: {0}")]
    Upstream(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<SymptomCheckerError> for AppError {
    fn from(err: SymptomCheckerError) -> Self {
        match err {
            SymptomCheckerError::NoSymptoms => AppError::ValidationError(err.to_string()),
            SymptomCheckerError::Upstream(_) => AppError::ExternalService(err.to_string()),
            SymptomCheckerError::Policy(e) => AppError::Forbidden(e.to_string()),
        }
    }
}
