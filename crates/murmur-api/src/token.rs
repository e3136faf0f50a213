use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use murmur_types::api::Claims;
use murmur_types::{ChatError, ObjectId};

pub const TOKEN_TTL_HOURS: i64 = 24;

/// HS256 token naming `user_id` as the subject.
pub fn mint(secret: &str, user_id: ObjectId) -> Result<String, ChatError> {
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Internal(format!("failed to sign token: {}", e)))
}

pub fn verify(secret: &str, token: &str) -> Result<Claims, ChatError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ChatError::Unauthorized("invalid or expired token".into()))
}
