//! Argon2 password hashing and login checks.

use rand::Rng;

use super::User;
use crate::error::AuthError;
use crate::store::Database;

/// Hash a password into an encoded Argon2 string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt: [u8; 16] = rand::thread_rng().r#gen();
    argon2::hash_encoded(password.as_bytes(), &salt, &argon2::Config::default())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Check a password against an encoded hash. Malformed hashes never verify.
pub fn verify_password(encoded: &str, password: &str) -> bool {
    match argon2::verify_encoded(encoded, password.as_bytes()) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be parsed");
            false
        }
    }
}

/// Look up `username` and check `password` against its stored hash.
///
/// Unknown users, accounts without a password, and wrong passwords are all
/// `InvalidCredentials`.
pub async fn authenticate(
    db: &dyn Database,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let user = db
        .get_user_by_username(username.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    let hash = user
        .password_hash
        .clone()
        .ok_or(AuthError::InvalidCredentials)?;

    let password = password.to_string();
    let verified = tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| AuthError::Hash(format!("verification task failed: {e}")))?;

    if verified {
        Ok(user)
    } else {
        Err(AuthError::InvalidCredentials)
    }
}
