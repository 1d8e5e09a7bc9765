use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// A freshly issued one-time password. Only `digest` is persisted.
#[derive(Debug, Clone)]
pub struct OtpCode {
    pub code: String,
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

fn keyed_mac(user_id: Uuid, code: &str, secret: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(user_id.as_bytes());
    mac.update(b":");
    mac.update(code.as_bytes());
    mac
}

pub fn generate_otp(user_id: Uuid, secret: &str, ttl: Duration, now: DateTime<Utc>) -> OtpCode {
    let code = format!("{:06}", rand::thread_rng().gen_range(100_000..1_000_000));
    let digest = STANDARD.encode(keyed_mac(user_id, &code, secret).finalize().into_bytes());
    OtpCode {
        code,
        digest,
        expires_at: now + ttl,
    }
}

pub fn verify_otp(
    user_id: Uuid,
    candidate: &str,
    digest: &str,
    expires_at: DateTime<Utc>,
    secret: &str,
    now: DateTime<Utc>,
) -> bool {
    if now >= expires_at {
        return false;
    }
    let Ok(expected) = STANDARD.decode(digest) else {
        return false;
    };
    keyed_mac(user_id, candidate.trim(), secret)
        .verify_slice(&expected)
        .is_ok()
}
