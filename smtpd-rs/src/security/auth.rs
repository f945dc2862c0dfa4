//! SMTP AUTH gateway and credential store
//!
//! Supported mechanisms:
//! - PLAIN (RFC 4616)
//! - LOGIN (common but not standardized)
//!
//! The gateway decodes credential tokens and delegates verification to the
//! SQLite-backed store; it never compares passwords itself. A decode
//! failure (bad base64, bad UTF-8, wrong field count) is a distinct error
//! from a verification failure.
//!
//! Passwords are hashed with Argon2. Disabled accounts always fail
//! verification.

use crate::error::{Result, SmtpdError};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SMTP authentication mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Decoded credential pair
///
/// Handed straight to verification and dropped; never stored by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A stored user account
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub email: String,
    pub enabled: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Credential store and AUTH gateway
#[derive(Clone)]
pub struct Authenticator {
    db: Arc<SqlitePool>,
}

impl Authenticator {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS smtp_users (
                email TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_login TEXT
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Decode a PLAIN credential token
    ///
    /// Format: base64 of `authzid \0 username \0 password`; the first field
    /// is conventionally empty. Anything other than exactly three fields is
    /// a decode error, never a verification failure.
    pub fn decode_plain(token: &str) -> Result<Credentials> {
        let decoded = BASE64
            .decode(token.trim())
            .map_err(|e| SmtpdError::AuthDecode(format!("invalid base64: {}", e)))?;

        let text = std::str::from_utf8(&decoded)
            .map_err(|e| SmtpdError::AuthDecode(format!("invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = text.split('\0').collect();
        if parts.len() != 3 {
            return Err(SmtpdError::AuthDecode(
                "PLAIN token must contain three NUL-separated fields".to_string(),
            ));
        }

        Ok(Credentials {
            username: parts[1].to_string(),
            password: parts[2].to_string(),
        })
    }

    /// Decode one LOGIN step (username or password), base64 encoded
    pub fn decode_login_credential(credential: &str) -> Result<String> {
        let decoded = BASE64
            .decode(credential.trim())
            .map_err(|e| SmtpdError::AuthDecode(format!("invalid base64: {}", e)))?;

        String::from_utf8(decoded)
            .map_err(|e| SmtpdError::AuthDecode(format!("invalid UTF-8: {}", e)))
    }

    /// Verify a username/password pair against the store
    ///
    /// Returns `Ok(false)` for unknown users, disabled accounts, and wrong
    /// passwords; `Err` is reserved for store failures.
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool> {
        debug!("Authentication attempt for {}", username);

        let row = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT email, password_hash, enabled
            FROM smtp_users
            WHERE email = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&*self.db)
        .await?;

        let Some((email, stored_hash, enabled)) = row else {
            warn!("Authentication failed: user not found: {}", username);
            return Ok(false);
        };

        if enabled == 0 {
            warn!("Authentication failed: account disabled: {}", username);
            return Ok(false);
        }

        let parsed_hash =
            PasswordHash::new(&stored_hash).map_err(|_e| SmtpdError::AuthenticationFailed)?;

        let argon2 = Argon2::default();
        let verified = argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();

        if verified {
            info!("Authentication successful for {}", email);

            sqlx::query(
                r#"
                UPDATE smtp_users
                SET last_login = datetime('now')
                WHERE email = ?
                "#,
            )
            .bind(&email)
            .execute(&*self.db)
            .await?;

            Ok(true)
        } else {
            warn!("Authentication failed: invalid password for {}", username);
            Ok(false)
        }
    }

    /// Add a new user with an Argon2-hashed password
    pub async fn create_user(&self, email: &str, password: &str) -> Result<()> {
        info!("Adding user: {}", email);

        let password_hash = self.hash_password(password)?;

        sqlx::query(
            r#"
            INSERT INTO smtp_users (email, password_hash, enabled, created_at)
            VALUES (?, ?, 1, datetime('now'))
            "#,
        )
        .bind(email)
        .bind(&password_hash)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// Enable or disable an account without deleting it
    pub async fn set_enabled(&self, email: &str, enabled: bool) -> Result<()> {
        info!(
            "{} user: {}",
            if enabled { "Enabling" } else { "Disabling" },
            email
        );

        sqlx::query(
            r#"
            UPDATE smtp_users SET enabled = ? WHERE email = ?
            "#,
        )
        .bind(enabled as i64)
        .bind(email)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    pub async fn delete_user(&self, email: &str) -> Result<()> {
        info!("Deleting user: {}", email);

        sqlx::query(
            r#"
            DELETE FROM smtp_users WHERE email = ?
            "#,
        )
        .bind(email)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    pub async fn user_exists(&self, email: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM smtp_users WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_one(&*self.db)
        .await?;

        Ok(count.0 > 0)
    }

    /// Look up a single account for the admin CLI
    pub async fn lookup(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, (String, i64, String, Option<String>)>(
            r#"
            SELECT email, enabled, created_at, last_login
            FROM smtp_users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(|(email, enabled, created_at, last_login)| UserRecord {
            email,
            enabled: enabled != 0,
            created_at,
            last_login,
        }))
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, (String, i64, String, Option<String>)>(
            r#"
            SELECT email, enabled, created_at, last_login
            FROM smtp_users
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(email, enabled, created_at, last_login)| UserRecord {
                email,
                enabled: enabled != 0,
                created_at,
                last_login,
            })
            .collect())
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SmtpdError::Config(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_verify_user() {
        let auth = Authenticator::new("sqlite::memory:").await.unwrap();

        auth.create_user("test@example.com", "password123")
            .await
            .unwrap();

        assert!(auth
            .verify("test@example.com", "password123")
            .await
            .unwrap());
        assert!(!auth.verify("test@example.com", "wrong").await.unwrap());
        assert!(!auth.verify("nobody@example.com", "password123").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_user_fails_verification() {
        let auth = Authenticator::new("sqlite::memory:").await.unwrap();

        auth.create_user("test@example.com", "password123")
            .await
            .unwrap();
        auth.set_enabled("test@example.com", false).await.unwrap();

        assert!(!auth
            .verify("test@example.com", "password123")
            .await
            .unwrap());

        auth.set_enabled("test@example.com", true).await.unwrap();
        assert!(auth
            .verify("test@example.com", "password123")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_user() {
        let auth = Authenticator::new("sqlite::memory:").await.unwrap();

        auth.create_user("test@example.com", "password")
            .await
            .unwrap();
        assert!(auth.user_exists("test@example.com").await.unwrap());

        auth.delete_user("test@example.com").await.unwrap();
        assert!(!auth.user_exists("test@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup() {
        let auth = Authenticator::new("sqlite::memory:").await.unwrap();

        assert!(auth.lookup("test@example.com").await.unwrap().is_none());

        auth.create_user("test@example.com", "password")
            .await
            .unwrap();

        let record = auth.lookup("test@example.com").await.unwrap().unwrap();
        assert_eq!(record.email, "test@example.com");
        assert!(record.enabled);
        assert!(record.last_login.is_none());
    }

    #[test]
    fn test_decode_plain() {
        let token = BASE64.encode(b"\0user@example.com\0password123");

        let creds = Authenticator::decode_plain(&token).unwrap();
        assert_eq!(creds.username, "user@example.com");
        assert_eq!(creds.password, "password123");
    }

    #[test]
    fn test_decode_plain_wrong_field_count() {
        // Two fields only - must be a decode error, not a failed verification
        let token = BASE64.encode(b"user@example.com\0password123");
        assert!(matches!(
            Authenticator::decode_plain(&token),
            Err(SmtpdError::AuthDecode(_))
        ));

        let token = BASE64.encode(b"no separators at all");
        assert!(matches!(
            Authenticator::decode_plain(&token),
            Err(SmtpdError::AuthDecode(_))
        ));
    }

    #[test]
    fn test_decode_plain_bad_base64() {
        assert!(matches!(
            Authenticator::decode_plain("!!not base64!!"),
            Err(SmtpdError::AuthDecode(_))
        ));
    }

    #[test]
    fn test_decode_login_credential() {
        let encoded = BASE64.encode(b"user@example.com");
        let decoded = Authenticator::decode_login_credential(&encoded).unwrap();
        assert_eq!(decoded, "user@example.com");
    }

    #[test]
    fn test_auth_mechanism_from_str() {
        assert_eq!(AuthMechanism::from_str("PLAIN"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_str("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_str("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::from_str("UNKNOWN"), None);
    }
}
