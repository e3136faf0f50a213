use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Minutes a freshly issued code stays valid.
pub const OTP_TTL_MINUTES: i64 = 10;

/// Six decimal digits, never starting with zero.
pub fn generate() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

/// Codes are stored as a hex SHA-256 digest, never in the clear.
pub fn digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().as_bytes()))
}

pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(OTP_TTL_MINUTES)
}

pub fn matches(code: &str, stored_digest: &str) -> bool {
    digest(code) == stored_digest
}
