use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};

use murmur_types::ChatError;

pub const MIN_LEN: usize = 8;
pub const MAX_LEN: usize = 20;

/// Length 8–20 with at least one digit, one lower-case and one upper-case
/// letter.
pub fn validate(password: &str) -> Result<(), ChatError> {
    let len = password.chars().count();
    if len < MIN_LEN {
        return Err(ChatError::BadInput(format!(
            "password must be at least {} characters long",
            MIN_LEN
        )));
    }
    if len > MAX_LEN {
        return Err(ChatError::BadInput(format!(
            "password must be no more than {} characters long",
            MAX_LEN
        )));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ChatError::BadInput("password must contain at least one digit".into()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ChatError::BadInput(
            "password must contain at least one lowercase letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ChatError::BadInput(
            "password must contain at least one uppercase letter".into(),
        ));
    }
    Ok(())
}

/// Hash with Argon2id and a random salt.
pub fn hash(password: &str) -> Result<String, ChatError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| ChatError::Internal(format!("failed to generate salt: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ChatError::Internal(format!("failed to hash password: {}", e)))
}

pub fn verify(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy() {
        assert!(validate("Secret123").is_ok());
        for bad in ["Sh0rt", "Waytoolongpassword12345", "NoDigitsHere", "nouppercase1", "NOLOWERCASE1"] {
            assert!(matches!(validate(bad), Err(ChatError::BadInput(_))), "{bad}");
        }
    }

    #[test]
    fn hash_verifies_only_its_password() {
        let hashed = hash("Secret123").unwrap();
        assert!(verify("Secret123", &hashed));
        assert!(!verify("Secret124", &hashed));
        assert!(!verify("Secret123", "not-a-hash"));
    }

    #[test]
    fn every_hash_gets_a_fresh_salt() {
        let first = hash("Secret123").unwrap();
        let second = hash("Secret123").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(verify("Secret123", &second));
    }
}
