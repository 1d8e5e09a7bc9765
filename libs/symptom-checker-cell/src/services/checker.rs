use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use auth_cell::{AccessPolicy, Operation, ResourceOwner};
use shared_config::AppConfig;
use shared_models::auth::AuthContext;

use crate::models::{
    PatientInfo, SymptomCheckRequest, SymptomCheckResponse, SymptomCheckerError, UpstreamRequest, DEFAULT_AGE,
    DEFAULT_GENDER,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SymptomCheckerService {
    http_client: Client,
    url: String,
    host: String,
    api_key: String,
}

impl SymptomCheckerService {
    pub fn new(config: &AppConfig) -> Self {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            http_client,
            url: config.symptom_checker_url.clone(),
            host: config.symptom_checker_host.clone(),
            api_key: config.rapidapi_key.clone(),
        }
    }

    /// Trimmed, non-empty symptoms plus the patient defaults.
    pub fn build_payload(request: SymptomCheckRequest) -> Result<UpstreamRequest, SymptomCheckerError> {
        let symptoms: Vec<String> = request
            .symptoms
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if symptoms.is_empty() {
            return Err(SymptomCheckerError::NoSymptoms);
        }

        let gender = request
            .gender
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_GENDER.to_string());

        Ok(UpstreamRequest {
            symptoms,
            patient_info: PatientInfo {
                age: request.age.unwrap_or(DEFAULT_AGE),
                gender,
            },
        })
    }

    pub async fn check(
        &self,
        ctx: &AuthContext,
        request: SymptomCheckRequest,
    ) -> Result<SymptomCheckResponse, SymptomCheckerError> {
        AccessPolicy::authorize(ctx, Operation::CheckSymptoms, ResourceOwner::patient(ctx.user_id))?;
        let payload = Self::build_payload(request)?;

        if self.api_key.is_empty() {
            error!("Symptom checker called without RAPIDAPI_KEY");
            return Err(SymptomCheckerError::Upstream("not configured".to_string()));
        }

        debug!("Checking {} symptoms for patient {}", payload.symptoms.len(), ctx.user_id);
        let response = self
            .http_client
            .post(&self.url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.host)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Symptom checker request failed: {}", e);
                SymptomCheckerError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Symptom checker returned {}: {}", status, body);
            return Err(SymptomCheckerError::Upstream(format!("upstream status {}", status.as_u16())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SymptomCheckerError::Upstream(format!("invalid response body: {}", e)))?;

        Ok(SymptomCheckResponse {
            result: body.get("result").cloned().unwrap_or_else(|| Value::Object(Default::default())),
            checked_at: Utc::now(),
        })
    }
}
