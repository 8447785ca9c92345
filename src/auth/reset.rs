use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// A password reset token. Only `hashed` is persisted; `plaintext` goes to
/// the user.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plaintext: String,
    pub hashed: String,
    pub expires_at: DateTime<Utc>,
}

pub fn create(now: DateTime<Utc>) -> ResetToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    let hashed = digest(&plaintext);
    ResetToken {
        plaintext,
        hashed,
        expires_at: now + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
    }
}

pub fn digest(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}
