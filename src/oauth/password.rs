//! Password hashing and the reuse policy.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;

use crate::errors::{PasswordError, TicketError};

/// Number of past passwords that may not be reused, current one included
pub const PASSWORD_HISTORY_DEPTH: usize = 3;

/// Password hashing seam
#[async_trait]
pub trait PasswordService: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// `false` for a wrong password and for an unparseable hash
    async fn verify(&self, password: &str, password_hash: &str) -> bool;
}

/// Argon2id with default parameters, run on the blocking pool
#[derive(Clone, Default)]
pub struct Argon2PasswordService;

impl Argon2PasswordService {
    pub fn new() -> Self {
        Self
    }
}

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[async_trait]
impl PasswordService for Argon2PasswordService {
    async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?
    }

    async fn verify(&self, password: &str, password_hash: &str) -> bool {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
            .await
            .unwrap_or(false)
    }
}

/// Check `new_password` against the current hash and the history, returning
/// the history to store alongside the new hash
pub async fn next_password_history(
    passwords: &dyn PasswordService,
    history: &[String],
    current_hash: &str,
    new_password: &str,
) -> Result<Vec<String>, TicketError> {
    let mut candidates: Vec<String> = history
        .iter()
        .filter(|hash| !hash.is_empty())
        .cloned()
        .collect();
    candidates.push(current_hash.to_string());

    for previous in &candidates {
        if passwords.verify(new_password, previous).await {
            return Err(TicketError::PasswordReused);
        }
    }

    while candidates.len() > PASSWORD_HISTORY_DEPTH - 1 {
        candidates.remove(0);
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let service = Argon2PasswordService::new();
        let hash = service.hash("correct horse").await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(service.verify("correct horse", &hash).await);
        assert!(!service.verify("wrong horse", &hash).await);
        assert!(!service.verify("correct horse", "not-a-hash").await);
    }

    #[tokio::test]
    async fn test_history_rejects_recent_passwords() {
        let service = Argon2PasswordService::new();
        let first = hash_password("first-password").unwrap();
        let second = hash_password("second-password").unwrap();
        let current = hash_password("current-password").unwrap();
        let history = vec![first.clone(), second.clone()];

        for reused in ["first-password", "second-password", "current-password"] {
            assert_eq!(
                next_password_history(&service, &history, &current, reused).await,
                Err(TicketError::PasswordReused)
            );
        }

        let next = next_password_history(&service, &history, &current, "brand-new-password")
            .await
            .unwrap();
        assert_eq!(next, vec![second, current]);
    }
}
