//! Password hashing.
//!
//! Each user gets a random salt; the stored hash is the hex SHA-256 of
//! `salt || password`.

use sha2::{Digest, Sha256};

use crate::errors::BoardError;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn validate(password: &str) -> Result<(), BoardError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(BoardError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare a candidate password against a stored hash without
/// short-circuiting on the first differing byte.
pub fn verify(candidate: &str, salt: &str, stored_hash: &str) -> bool {
    let computed = hash(candidate, salt);
    let (a, b) = (computed.as_bytes(), stored_hash.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_salted() {
        let a = hash("hunter22", "salt-a");
        let b = hash("hunter22", "salt-b");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify() {
        let salt = new_salt();
        let stored = hash("correct horse", &salt);
        assert!(verify("correct horse", &salt, &stored));
        assert!(!verify("correct hors", &salt, &stored));
        assert!(!verify("correct horse", "other", &stored));
    }

    #[test]
    fn test_min_length() {
        assert!(validate("12345").is_err());
        assert!(validate("123456").is_ok());
    }

    #[test]
    fn test_salts_are_unique() {
        assert_ne!(new_salt(), new_salt());
    }
}
