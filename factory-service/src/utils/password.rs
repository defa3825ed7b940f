use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, Secret};

/// Plaintext password; the secret wrapper keeps it out of `Debug` output.
#[derive(Debug, Clone)]
pub struct Password(Secret<String>);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Secret::new(password.into()))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }
}

/// Hash a password with Argon2id and a random salt, returning the PHC string.
pub fn hash_password(password: &Password) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}

/// Check a password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch and `Err` only when the stored hash is
/// malformed.
pub fn verify_password(password: &Password, password_hash: &str) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let hash = hash_password(&Password::new("mySecurePassword123")).unwrap();
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn test_verify_password() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password).unwrap();

        assert!(verify_password(&password, &hash).unwrap());
        assert!(!verify_password(&Password::new("wrongPassword"), &hash).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let password = Password::new("mySecurePassword123");
        let hash1 = hash_password(&password).unwrap();
        let hash2 = hash_password(&password).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password(&password, &hash1).unwrap());
        assert!(verify_password(&password, &hash2).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_password(&Password::new("x"), "not-a-hash").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", Password::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
