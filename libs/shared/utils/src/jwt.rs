use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{JwtHeader, Role, SessionClaims};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Session secret is not set")]
    MissingSecret,

    #[error("Invalid token format")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,
}

fn mac_for(secret: &str) -> Result<HmacSha256, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::MissingSecret)
}

/// Sign a session token for `user_id`, valid for `ttl` from `now`.
pub fn issue_token(
    user_id: Uuid,
    role: Role,
    secret: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<(String, SessionClaims), TokenError> {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let token = sign_claims(&claims, secret)?;
    Ok((token, claims))
}

pub fn sign_claims(claims: &SessionClaims, secret: &str) -> Result<String, TokenError> {
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let header_json = serde_json::to_vec(&header).map_err(|_| TokenError::Malformed)?;
    let claims_json = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

pub fn validate_token(token: &str, secret: &str) -> Result<SessionClaims, TokenError> {
    validate_token_at(token, secret, Utc::now())
}

pub fn validate_token_at(
    token: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<SessionClaims, TokenError> {
    let mut mac = mac_for(secret)?;

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Malformed);
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];

    let signature = URL_SAFE_NO_PAD.decode(parts[2]).map_err(|e| {
        debug!("Failed to decode signature: {}", e);
        TokenError::Malformed
    })?;

    mac.update(format!("{}.{}", header_b64, claims_b64).as_bytes());
    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err(TokenError::BadSignature);
    }

    let header: JwtHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(TokenError::Malformed)?;
    if header.alg != "HS256" {
        return Err(TokenError::Malformed);
    }

    let claims: SessionClaims = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| {
            debug!("Failed to parse claims");
            TokenError::Malformed
        })?;

    if claims.exp <= now.timestamp() {
        debug!("Token expired at {} (now: {})", claims.exp, now.timestamp());
        return Err(TokenError::Expired);
    }

    debug!("Token validated successfully for user: {}", claims.sub);
    Ok(claims)
}
