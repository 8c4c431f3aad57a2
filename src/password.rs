use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::MarketError;

pub fn hash_password(password: &str) -> Result<String, MarketError> {
    if password.is_empty() {
        return Err(MarketError::Validation(
            "Password cannot be empty".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| MarketError::PasswordHash(err.to_string()))
}

/// `Ok(false)` on a wrong password; `Err` only when the stored hash is unusable.
pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool, MarketError> {
    if password.is_empty() {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored_hash)
        .map_err(|err| MarketError::PasswordHash(format!("invalid stored hash: {}", err)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(MarketError::PasswordHash(err.to_string())),
    }
}

/// Password for accounts created through an external login; nobody knows it.
pub fn random_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
