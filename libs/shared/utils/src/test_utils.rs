use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use chrono::{Duration, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{encode_ts, Database};
use shared_models::auth::{AuthContext, Role, SessionClaims};

use crate::jwt::{issue_token, sign_claims};
use crate::notify::{Notification, NotificationError, NotificationSender};
use crate::state::AppState;

pub struct TestConfig {
    pub session_secret: String,
    pub symptom_checker_url: String,
    pub rapidapi_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            session_secret: "test-secret-key-for-session-tokens-must-be-long-enough".to_string(),
            symptom_checker_url: "http://localhost:9/analyze".to_string(),
            rapidapi_key: "test-rapidapi-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_path: ":memory:".to_string(),
            session_secret: self.session_secret.clone(),
            session_ttl_minutes: 60,
            otp_ttl_minutes: 10,
            symptom_checker_url: self.symptom_checker_url.clone(),
            symptom_checker_host: "symptoms.test".to_string(),
            rapidapi_key: self.rapidapi_key.clone(),
            notification_webhook_url: String::new(),
            jitsi_domain: "meet.example.org".to_string(),
            reminder_poll_seconds: 60,
            bind_address: "127.0.0.1:0".to_string(),
        }
    }

    /// Fresh in-memory state with a notifier that records what was sent.
    pub fn to_state(&self) -> (Arc<AppState>, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let db = Database::open_in_memory().expect("in-memory database");
        let state = AppState::with_notifier(self.to_app_config(), db, Arc::new(notifier.clone()));
        (Arc::new(state), notifier)
    }
}

static PHONE_SEQ: AtomicU64 = AtomicU64::new(1_000_000);

pub struct TestUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
}

impl TestUser {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: format!("Test {}", role),
            email: email.to_string(),
            phone: format!("+1555{:07}", PHONE_SEQ.fetch_add(1, Ordering::Relaxed)),
            role,
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, Role::Doctor)
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, Role::Patient)
    }

    pub fn context(&self) -> AuthContext {
        AuthContext::new(self.id, self.role)
    }

    /// Insert the user row directly, bypassing password hashing.
    pub fn insert(self, db: &Database) -> Self {
        let now = encode_ts(&Utc::now());
        let specialty = match self.role {
            Role::Doctor => Some("General Practice"),
            Role::Patient => None,
        };
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, role, name, email, phone, password_hash, specialty,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'not-a-real-hash', ?6, ?7, ?7)",
                rusqlite::params![
                    self.id.to_string(),
                    self.role.as_str(),
                    self.name,
                    self.email,
                    self.phone,
                    specialty,
                    now
                ],
            )
            .map_err(shared_database::DatabaseError::from)
        })
        .expect("insert test user");
        self
    }

    pub fn token(&self, secret: &str) -> String {
        JwtTestUtils::create_test_token(self, secret, Some(24))
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let ttl = Duration::hours(exp_hours.unwrap_or(24));
        if ttl > Duration::zero() {
            let (token, _) = issue_token(user.id, user.role, secret, ttl, now)
                .expect("sign test token");
            return token;
        }

        // issue_token never produces an already-expired token
        let claims = SessionClaims {
            sub: user.id.to_string(),
            role: user.role,
            iat: (now + ttl - Duration::hours(1)).timestamp(),
            exp: (now + ttl).timestamp(),
        };
        sign_claims(&claims, secret).expect("sign test token")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Notifier that keeps every notification in memory, optionally failing.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: Uuid) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient_id == recipient)
            .collect()
    }

    /// The six-digit code from the latest OTP message sent to `recipient`.
    pub fn last_otp_for(&self, recipient: Uuid) -> Option<String> {
        self.sent_to(recipient).iter().rev().find_map(|n| {
            n.message
                .split(|c: char| !c.is_ascii_digit())
                .find(|part| part.len() == 6)
                .map(str::to_string)
        })
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if *self.failing.lock().unwrap() {
            return Err(NotificationError::Transport("recording notifier set to fail".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if body.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(&body).unwrap()
}
