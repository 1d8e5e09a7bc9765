use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{encode_ts, is_unique_violation, opt_ts_column, parsed_column, ts_column, uuid_column, Database};
use shared_models::auth::{AuthContext, Role, TokenResponse};
use shared_utils::jwt::issue_token;
use shared_utils::notify::{notify_best_effort, Notification, NotificationChannel, NotificationSender};
use shared_utils::state::AppState;

use crate::models::{AccountError, LoginChallenge, LoginRequest, RegisterRequest, UpdateProfileRequest, User, VerifyOtpRequest};
use crate::services::otp::{generate_otp, verify_otp};
use crate::services::password::{hash_password, verify_password};
use crate::services::validation::{normalize_email, normalize_phone, validate_name, validate_phone, validate_registration};

/// Wrong codes allowed before the pending code is thrown away.
const MAX_OTP_ATTEMPTS: i64 = 5;

const USER_COLUMNS: &str =
    "id, role, name, email, phone, specialty, is_active, online, created_at, updated_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_column(row, 0)?,
        role: parsed_column(row, 1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        specialty: row.get(5)?,
        is_active: row.get(6)?,
        online: row.get(7)?,
        created_at: ts_column(row, 8)?,
        updated_at: ts_column(row, 9)?,
    })
}

fn find_user(conn: &Connection, id: Uuid) -> Result<Option<User>, AccountError> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id.to_string()],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// A new session has to start strictly after the last sign-out, which is
/// kept at whole-second precision.
fn session_start(now: DateTime<Utc>, revoked_at: Option<i64>) -> DateTime<Utc> {
    match revoked_at {
        Some(revoked) if now.timestamp() <= revoked => DateTime::from_timestamp(revoked + 1, 0).unwrap_or(now),
        _ => now,
    }
}

/// Account Store plus the login half of the Session/Auth Gateway.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    notifier: Arc<dyn NotificationSender>,
    session_secret: String,
    session_ttl: Duration,
    otp_ttl: Duration,
}

impl AccountService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            notifier: Arc::clone(&state.notifier),
            session_secret: state.config.session_secret.clone(),
            session_ttl: Duration::minutes(state.config.session_ttl_minutes),
            otp_ttl: Duration::minutes(state.config.otp_ttl_minutes),
        }
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub fn register(&self, request: RegisterRequest) -> Result<User, AccountError> {
        let valid = validate_registration(&request).map_err(AccountError::Validation)?;
        let password_hash = hash_password(&request.password)
            .map_err(|e| AccountError::Crypto(e.to_string()))?;

        let id = Uuid::new_v4();
        let now = encode_ts(&Utc::now());

        let user = self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR phone = ?2)",
                params![valid.email, valid.phone],
                |row| row.get(0),
            )?;
            if exists {
                return Err(AccountError::DuplicateIdentity);
            }

            conn.execute(
                "INSERT INTO users (id, role, name, email, phone, password_hash, specialty,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    valid.role.as_str(),
                    valid.name,
                    valid.email,
                    valid.phone,
                    password_hash,
                    valid.specialty,
                    now
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccountError::DuplicateIdentity
                } else {
                    AccountError::from(e)
                }
            })?;

            find_user(conn, id)?.ok_or(AccountError::NotFound)
        })?;

        info!("Registered {} account {}", user.role, user.id);
        Ok(user)
    }

    /// Check email, password and role. Unknown, disabled and wrong-password
    /// accounts are indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, email: &str, password: &str, role: Role) -> Result<User, AccountError> {
        let email = normalize_email(email);

        let found: Option<(Uuid, String, bool)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, password_hash, is_active FROM users WHERE email = ?1",
                [&email],
                |row| Ok((uuid_column(row, 0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(AccountError::from)
        })?;

        let Some((id, password_hash, is_active)) = found else {
            debug!("Login attempt for unknown email");
            return Err(AccountError::InvalidCredential);
        };

        let matches = verify_password(password, &password_hash).unwrap_or_else(|e| {
            warn!("Stored password hash for {} is unreadable: {}", id, e);
            false
        });
        if !matches || !is_active {
            return Err(AccountError::InvalidCredential);
        }

        let user = self.get_by_id(id)?;
        if user.role != role {
            return Err(AccountError::RoleMismatch(role));
        }

        Ok(user)
    }

    /// First login step: check the password, then send a one-time code.
    pub async fn begin_login(&self, request: LoginRequest) -> Result<LoginChallenge, AccountError> {
        // Argon2 verification runs on the blocking pool.
        let service = self.clone();
        let user = tokio::task::spawn_blocking(move || {
            service.authenticate(&request.email, &request.password, request.role)
        })
        .await
        .map_err(|e| AccountError::Crypto(format!("password check did not finish: {}", e)))??;
        let otp = generate_otp(user.id, &self.session_secret, self.otp_ttl, Utc::now());

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET otp_hash = ?1, otp_expires_at = ?2, otp_attempts = 0 WHERE id = ?3",
                params![otp.digest, encode_ts(&otp.expires_at), user.id.to_string()],
            )
            .map_err(AccountError::from)
        })?;

        let message = format!(
            "Your login code is {}. It expires in {} minutes.",
            otp.code,
            self.otp_ttl.num_minutes()
        );
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(user.id, message, NotificationChannel::Sms),
        )
        .await;

        debug!("OTP issued for user {}", user.id);
        Ok(LoginChallenge {
            otp_required: true,
            expires_at: otp.expires_at,
        })
    }

    /// Second login step: consume the one-time code and open a session.
    /// Doctors come online when they sign in.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub fn verify_otp(&self, request: VerifyOtpRequest) -> Result<(User, TokenResponse), AccountError> {
        let email = normalize_email(&request.email);
        let now = Utc::now();

        let (user, revoked_at) = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;

            let pending = tx
                .query_row(
                    "SELECT id, otp_hash, otp_expires_at, is_active, sessions_revoked_at
                     FROM users WHERE email = ?1",
                    [&email],
                    |row| {
                        Ok((
                            uuid_column(row, 0)?,
                            row.get::<_, Option<String>>(1)?,
                            opt_ts_column(row, 2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, Some(digest), Some(expires_at), true, revoked_at)) = pending else {
                return Err(AccountError::InvalidOtp);
            };

            if !verify_otp(id, &request.otp, &digest, expires_at, &self.session_secret, now) {
                // The pending code is discarded once too many guesses miss.
                tx.execute(
                    "UPDATE users
                     SET otp_attempts = otp_attempts + 1,
                         otp_hash = CASE WHEN otp_attempts + 1 >= ?2 THEN NULL ELSE otp_hash END,
                         otp_expires_at = CASE WHEN otp_attempts + 1 >= ?2 THEN NULL ELSE otp_expires_at END
                     WHERE id = ?1 AND otp_hash = ?3",
                    params![id.to_string(), MAX_OTP_ATTEMPTS, digest],
                )?;
                tx.commit()?;
                warn!("Wrong one-time code for user {}", id);
                return Err(AccountError::InvalidOtp);
            }

            // Single use: the digest must still be the one we just checked.
            let cleared = tx.execute(
                "UPDATE users
                 SET otp_hash = NULL, otp_expires_at = NULL, otp_attempts = 0,
                     online = CASE WHEN role = 'doctor' THEN 1 ELSE online END,
                     updated_at = ?1
                 WHERE id = ?2 AND otp_hash = ?3",
                params![encode_ts(&now), id.to_string(), digest],
            )?;
            if cleared != 1 {
                return Err(AccountError::InvalidOtp);
            }

            let user = find_user(&tx, id)?.ok_or(AccountError::NotFound)?;
            tx.commit()?;
            Ok((user, revoked_at))
        })?;

        let issued_at = session_start(now, revoked_at);
        let (token, claims) = issue_token(user.id, user.role, &self.session_secret, self.session_ttl, issued_at)
            .map_err(|e| AccountError::Crypto(e.to_string()))?;

        info!("User {} signed in as {}", user.id, user.role);
        let response = TokenResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_at: claims.exp,
            user_id: user.id,
            role: user.role,
        };
        Ok((user, response))
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<User, AccountError> {
        self.db
            .with_conn(|conn| find_user(conn, id))?
            .ok_or(AccountError::NotFound)
    }

    /// Look up a doctor account by id; patients and disabled doctors are
    /// reported as missing.
    pub fn get_doctor(&self, id: Uuid) -> Result<User, AccountError> {
        match self.get_by_id(id)? {
            user if user.role == Role::Doctor && user.is_active => Ok(user),
            _ => Err(AccountError::NotFound),
        }
    }

    /// Edit name, phone or specialty. The role is never editable.
    pub fn update_profile(&self, ctx: &AuthContext, request: UpdateProfileRequest) -> Result<User, AccountError> {
        let mut issues = Vec::new();
        let name = request.name.as_deref().map(str::trim).map(str::to_string);
        let phone = request.phone.as_deref().map(normalize_phone);
        let specialty = request.specialty.as_deref().map(str::trim).map(str::to_string);

        if let Some(name) = &name {
            validate_name(name, &mut issues);
        }
        if let Some(phone) = &phone {
            validate_phone(phone, &mut issues);
        }
        if let Some(specialty) = &specialty {
            if ctx.role != Role::Doctor {
                issues.push("Only doctors have a specialty".to_string());
            } else if specialty.is_empty() {
                issues.push("Specialty is required for doctors".to_string());
            }
        }
        if !issues.is_empty() {
            return Err(AccountError::Validation(issues));
        }

        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE users
                     SET name = COALESCE(?1, name),
                         phone = COALESCE(?2, phone),
                         specialty = COALESCE(?3, specialty),
                         updated_at = ?4
                     WHERE id = ?5 AND is_active = 1",
                    params![name, phone, specialty, encode_ts(&Utc::now()), ctx.user_id.to_string()],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        AccountError::DuplicateIdentity
                    } else {
                        AccountError::from(e)
                    }
                })?;
            if updated == 0 {
                return Err(AccountError::NotFound);
            }
            find_user(conn, ctx.user_id)?.ok_or(AccountError::NotFound)
        })
    }

    /// Soft-disable: the row stays, sign-in and existing sessions stop working.
    pub fn disable(&self, id: Uuid) -> Result<(), AccountError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_active = 0, online = 0, otp_hash = NULL, otp_expires_at = NULL,
                                  updated_at = ?1
                 WHERE id = ?2",
                params![encode_ts(&Utc::now()), id.to_string()],
            )
            .map_err(AccountError::from)
        })?;
        if updated == 0 {
            return Err(AccountError::NotFound);
        }
        info!("Account {} disabled", id);
        Ok(())
    }

    /// Last write wins.
    pub fn set_online(&self, doctor_id: Uuid, online: bool) -> Result<User, AccountError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET online = ?1, updated_at = ?2
                 WHERE id = ?3 AND role = 'doctor' AND is_active = 1",
                params![online, encode_ts(&Utc::now()), doctor_id.to_string()],
            )?;
            if updated == 0 {
                return Err(AccountError::NotFound);
            }
            find_user(conn, doctor_id)?.ok_or(AccountError::NotFound)
        })
    }

    /// Flip the flag in one statement so concurrent toggles never read stale state.
    pub fn toggle_online(&self, doctor_id: Uuid) -> Result<User, AccountError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET online = 1 - online, updated_at = ?1
                 WHERE id = ?2 AND role = 'doctor' AND is_active = 1",
                params![encode_ts(&Utc::now()), doctor_id.to_string()],
            )?;
            if updated == 0 {
                return Err(AccountError::NotFound);
            }
            find_user(conn, doctor_id)?.ok_or(AccountError::NotFound)
        })
    }

    /// End every session the caller holds. Doctors also go offline.
    pub fn logout(&self, ctx: &AuthContext) -> Result<(), AccountError> {
        let now = Utc::now();
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET sessions_revoked_at = ?1,
                     online = CASE WHEN role = 'doctor' THEN 0 ELSE online END,
                     updated_at = ?2
                 WHERE id = ?3",
                params![now.timestamp(), encode_ts(&now), ctx.user_id.to_string()],
            )
            .map_err(AccountError::from)
        })?;
        if updated == 0 {
            return Err(AccountError::NotFound);
        }
        info!("User {} signed out", ctx.user_id);
        Ok(())
    }

    pub fn list_online_doctors(&self) -> Result<Vec<User>, AccountError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users
                 WHERE role = 'doctor' AND online = 1 AND is_active = 1
                 ORDER BY name, id",
                USER_COLUMNS
            ))?;
            let doctors = stmt
                .query_map([], map_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(doctors)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::{RecordingNotifier, TestConfig};

    fn service() -> (AccountService, RecordingNotifier) {
        let (state, notifier) = TestConfig::default().to_state();
        (AccountService::new(&state), notifier)
    }

    fn registration(email: &str, phone: &str, role: Role) -> RegisterRequest {
        RegisterRequest {
            name: "Dana Scully".to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            role,
            password: "trustno1x".to_string(),
            password_confirm: "trustno1x".to_string(),
            specialty: Some("Pathology".to_string()),
        }
    }

    #[test]
    fn register_then_authenticate() {
        let (service, _) = service();
        let user = service
            .register(registration("Dana@Example.com", "+15550100001", Role::Doctor))
            .unwrap();

        assert_eq!(user.email, "dana@example.com");
        assert_eq!(user.specialty.as_deref(), Some("Pathology"));
        assert!(!user.online);

        let authed = service.authenticate("dana@example.com", "trustno1x", Role::Doctor).unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[test]
    fn duplicate_email_or_phone_is_rejected() {
        let (service, _) = service();
        service.register(registration("a@example.com", "+15550100002", Role::Patient)).unwrap();

        assert_matches!(
            service.register(registration("a@example.com", "+15550100003", Role::Patient)),
            Err(AccountError::DuplicateIdentity)
        );
        assert_matches!(
            service.register(registration("b@example.com", "+15550100002", Role::Patient)),
            Err(AccountError::DuplicateIdentity)
        );
    }

    #[test]
    fn wrong_password_and_wrong_role_fail() {
        let (service, _) = service();
        service.register(registration("p@example.com", "+15550100004", Role::Patient)).unwrap();

        assert_matches!(
            service.authenticate("p@example.com", "nottheone1", Role::Patient),
            Err(AccountError::InvalidCredential)
        );
        assert_matches!(
            service.authenticate("nobody@example.com", "trustno1x", Role::Patient),
            Err(AccountError::InvalidCredential)
        );
        assert_matches!(
            service.authenticate("p@example.com", "trustno1x", Role::Doctor),
            Err(AccountError::RoleMismatch(Role::Doctor))
        );
    }

    #[tokio::test]
    async fn otp_login_issues_session_and_marks_doctor_online() {
        let (service, notifier) = service();
        let doctor = service
            .register(registration("doc@example.com", "+15550100005", Role::Doctor))
            .unwrap();

        let challenge = service
            .begin_login(LoginRequest {
                email: "doc@example.com".to_string(),
                password: "trustno1x".to_string(),
                role: Role::Doctor,
            })
            .await
            .unwrap();
        assert!(challenge.otp_required);

        let code = notifier.last_otp_for(doctor.id).expect("otp was sent");
        let (user, token) = service
            .verify_otp(VerifyOtpRequest {
                email: "doc@example.com".to_string(),
                otp: code.clone(),
            })
            .unwrap();

        assert!(user.online);
        assert_eq!(token.role, Role::Doctor);
        assert_eq!(token.token_type, "Bearer");

        // The code is single use.
        assert_matches!(
            service.verify_otp(VerifyOtpRequest {
                email: "doc@example.com".to_string(),
                otp: code,
            }),
            Err(AccountError::InvalidOtp)
        );
    }

    async fn request_code(service: &AccountService, email: &str, role: Role) {
        service
            .begin_login(LoginRequest {
                email: email.to_string(),
                password: "trustno1x".to_string(),
                role,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn repeated_wrong_codes_discard_the_pending_code() {
        let (service, notifier) = service();
        let user = service.register(registration("guess@example.com", "+15550100010", Role::Patient)).unwrap();
        request_code(&service, "guess@example.com", Role::Patient).await;
        let code = notifier.last_otp_for(user.id).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_OTP_ATTEMPTS {
            assert_matches!(
                service.verify_otp(VerifyOtpRequest {
                    email: "guess@example.com".to_string(),
                    otp: wrong.to_string(),
                }),
                Err(AccountError::InvalidOtp)
            );
        }

        // The right code no longer works after the limit.
        assert_matches!(
            service.verify_otp(VerifyOtpRequest {
                email: "guess@example.com".to_string(),
                otp: code,
            }),
            Err(AccountError::InvalidOtp)
        );

        // A fresh code starts a fresh count.
        request_code(&service, "guess@example.com", Role::Patient).await;
        let code = notifier.last_otp_for(user.id).unwrap();
        assert!(service
            .verify_otp(VerifyOtpRequest {
                email: "guess@example.com".to_string(),
                otp: code,
            })
            .is_ok());
    }

    #[tokio::test]
    async fn sign_in_after_logout_starts_after_the_revocation() {
        let (service, notifier) = service();
        let user = service.register(registration("again@example.com", "+15550100011", Role::Doctor)).unwrap();
        let ctx = AuthContext::new(user.id, user.role);

        request_code(&service, "again@example.com", Role::Doctor).await;
        let (_, first) = service
            .verify_otp(VerifyOtpRequest {
                email: "again@example.com".to_string(),
                otp: notifier.last_otp_for(user.id).unwrap(),
            })
            .unwrap();

        service.logout(&ctx).unwrap();
        assert!(!service.get_by_id(user.id).unwrap().online);

        request_code(&service, "again@example.com", Role::Doctor).await;
        let (_, second) = service
            .verify_otp(VerifyOtpRequest {
                email: "again@example.com".to_string(),
                otp: notifier.last_otp_for(user.id).unwrap(),
            })
            .unwrap();

        let revoked_at: i64 = service
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT sessions_revoked_at FROM users WHERE id = ?1",
                    [user.id.to_string()],
                    |row| row.get(0),
                )
                .map_err(AccountError::from)
            })
            .unwrap();
        assert!(first.expires_at <= revoked_at + service.session_ttl.num_seconds());
        assert!(second.expires_at - service.session_ttl.num_seconds() > revoked_at);
    }

    #[test]
    fn session_start_moves_past_same_second_revocation() {
        let now = DateTime::from_timestamp(1_900_000_000, 500_000_000).unwrap();
        assert_eq!(session_start(now, None), now);
        assert_eq!(session_start(now, Some(1_899_999_999)), now);
        assert_eq!(session_start(now, Some(1_900_000_000)).timestamp(), 1_900_000_001);
    }

    #[tokio::test]
    async fn login_survives_notification_failure() {
        let (service, notifier) = service();
        service.register(registration("p2@example.com", "+15550100006", Role::Patient)).unwrap();
        notifier.set_failing(true);

        let challenge = service
            .begin_login(LoginRequest {
                email: "p2@example.com".to_string(),
                password: "trustno1x".to_string(),
                role: Role::Patient,
            })
            .await;
        assert!(challenge.is_ok());
    }

    #[test]
    fn disabled_accounts_cannot_sign_in() {
        let (service, _) = service();
        let user = service.register(registration("gone@example.com", "+15550100007", Role::Patient)).unwrap();

        service.disable(user.id).unwrap();

        assert!(!service.get_by_id(user.id).unwrap().is_active);
        assert_matches!(
            service.authenticate("gone@example.com", "trustno1x", Role::Patient),
            Err(AccountError::InvalidCredential)
        );
    }

    #[test]
    fn profile_update_keeps_role_and_rejects_patient_specialty() {
        let (service, _) = service();
        let user = service.register(registration("pp@example.com", "+15550100008", Role::Patient)).unwrap();
        let ctx = AuthContext::new(user.id, user.role);

        let updated = service
            .update_profile(&ctx, UpdateProfileRequest {
                name: Some("Dana K. Scully".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.name, "Dana K. Scully");
        assert_eq!(updated.role, Role::Patient);

        assert_matches!(
            service.update_profile(&ctx, UpdateProfileRequest {
                specialty: Some("Surgery".to_string()),
                ..Default::default()
            }),
            Err(AccountError::Validation(_))
        );
    }

    #[test]
    fn toggle_and_list_online_doctors() {
        let (service, _) = service();
        let doctor = service.register(registration("d2@example.com", "+15550100009", Role::Doctor)).unwrap();

        assert!(service.list_online_doctors().unwrap().is_empty());
        assert!(service.toggle_online(doctor.id).unwrap().online);
        assert_eq!(service.list_online_doctors().unwrap().len(), 1);
        assert!(!service.toggle_online(doctor.id).unwrap().online);
        assert_matches!(service.get_by_id(Uuid::new_v4()), Err(AccountError::NotFound));
    }
}
