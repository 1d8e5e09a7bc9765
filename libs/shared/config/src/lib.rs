use std::env;
use tracing::warn;

pub const DEFAULT_SYMPTOM_CHECKER_HOST: &str =
    "ai-medical-diagnosis-api-symptoms-to-results.p.rapidapi.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub session_secret: String,
    pub session_ttl_minutes: i64,
    pub otp_ttl_minutes: i64,
    pub symptom_checker_url: String,
    pub symptom_checker_host: String,
    pub rapidapi_key: String,
    pub notification_webhook_url: String,
    pub jitsi_domain: String,
    pub reminder_poll_seconds: u64,
    pub bind_address: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_PATH not set, using telemed.db");
                    "telemed.db".to_string()
                }),
            session_secret: env::var("SESSION_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SESSION_SECRET not set, using empty value");
                    String::new()
                }),
            session_ttl_minutes: parse_or("SESSION_TTL_MINUTES", 720),
            otp_ttl_minutes: parse_or("OTP_TTL_MINUTES", 10),
            symptom_checker_url: env::var("SYMPTOM_CHECKER_URL")
                .unwrap_or_else(|_| {
                    format!(
                        "https://{}/analyzeSymptomsAndDiagnose?noqueue=1",
                        DEFAULT_SYMPTOM_CHECKER_HOST
                    )
                }),
            symptom_checker_host: env::var("SYMPTOM_CHECKER_HOST")
                .unwrap_or_else(|_| DEFAULT_SYMPTOM_CHECKER_HOST.to_string()),
            rapidapi_key: env::var("RAPIDAPI_KEY")
                .unwrap_or_else(|_| {
                    warn!("RAPIDAPI_KEY not set, symptom checker disabled");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_default(),
            jitsi_domain: env::var("JITSI_DOMAIN")
                .unwrap_or_else(|_| "meet.jit.si".to_string()),
            reminder_poll_seconds: parse_or("REMINDER_POLL_SECONDS", 60),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.session_secret.is_empty()
    }

    pub fn is_symptom_checker_configured(&self) -> bool {
        !self.rapidapi_key.is_empty() && !self.symptom_checker_url.is_empty()
    }

    pub fn is_notification_webhook_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number, using default", key);
            default
        }),
        Err(_) => default,
    }
}
