//! Argon2 password hashing (PHC string format).

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use super::AccountError;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AccountError> {
    assert!(!password.is_empty(), "password cannot be empty");

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::Hash(e.to_string()))
}

/// `false` for a wrong password or an unparseable stored hash.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is unparseable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Tamaraw-Falls-88").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Tamaraw-Falls-88", &hash));
        assert!(!verify_password("tamaraw-falls-88", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("Tamaraw-Falls-88").unwrap();
        let b = hash_password("Tamaraw-Falls-88").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
