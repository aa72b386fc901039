// src/utils/hash.rs

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::AppError;

/// Hashes a lesson or override password with Argon2 and a random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .to_string();

    Ok(password_hash)
}

/// Checks a typed password against a stored hash.
///
/// A mismatch is `Ok(false)`; only an unparseable hash is an error.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Hashes an optional plain password from a request.
///
/// An empty string is kept as is: on an override it switches the password off.
pub fn hash_optional(password: Option<&str>) -> Result<Option<String>, AppError> {
    match password {
        None => Ok(None),
        Some("") => Ok(Some(String::new())),
        Some(plain) => hash_password(plain).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("letmein").unwrap();
        assert_ne!(hash, "letmein");
        assert!(verify_password("letmein", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_garbage_hash_is_an_error() {
        assert!(verify_password("letmein", "not-a-hash").is_err());
    }

    #[test]
    fn test_empty_password_stays_empty() {
        assert_eq!(hash_optional(Some("")).unwrap(), Some(String::new()));
        assert_eq!(hash_optional(None).unwrap(), None);
    }
}
