//! Email/password accounts for the local identity service.
//!
//! Passwords are never stored: each account keeps a random salt and the
//! BLAKE3 `derive_key` digest of salt and password.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use teamdesk_shared::models::AuthRecord;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::records::format_timestamp;

const PASSWORD_KDF_CONTEXT: &str = "teamdesk-local-auth-v1 password digest";
const SALT_LEN: usize = 16;
const MIN_PASSWORD_LEN: usize = 6;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn password_digest(salt: &[u8], password: &str) -> String {
    let mut material = Vec::with_capacity(salt.len() + password.len());
    material.extend_from_slice(salt);
    material.extend_from_slice(password.as_bytes());
    hex::encode(blake3::derive_key(PASSWORD_KDF_CONTEXT, &material))
}

impl Database {
    /// Register a new account.
    pub fn create_account(
        &self,
        email: &str,
        password: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AuthRecord> {
        let email = normalize_email(email);
        if !email.contains('@') || email.starts_with('@') {
            return Err(StoreError::InvalidSignUp(format!("malformed email {email:?}")));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(StoreError::InvalidSignUp(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        self.conn().execute(
            "INSERT INTO auth_users (id, email, password_salt, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                email,
                hex::encode(salt),
                password_digest(&salt, password),
                format_timestamp(now),
            ],
        )?;

        tracing::info!(user = %id, "account created");

        Ok(AuthRecord {
            id,
            email: Some(email),
            created_at: now,
        })
    }

    /// Check credentials and return the matching account.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<AuthRecord> {
        let email = normalize_email(email);
        let found: Option<(String, String, String, String)> = self
            .conn()
            .query_row(
                "SELECT id, password_salt, password_hash, created_at
                 FROM auth_users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let (id, salt_hex, hash_hex, created_at) = found.ok_or(StoreError::InvalidCredentials)?;
        let salt = hex::decode(salt_hex).map_err(|_| StoreError::InvalidCredentials)?;
        if password_digest(&salt, password) != hash_hex {
            return Err(StoreError::InvalidCredentials);
        }

        Ok(AuthRecord {
            id: Uuid::parse_str(&id)?,
            email: Some(email),
            created_at: parse_timestamp(&created_at)?,
        })
    }

    /// Every account, newest first.
    pub fn list_accounts(&self) -> Result<Vec<AuthRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, email, created_at FROM auth_users ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, email, created_at) = row?;
            records.push(AuthRecord {
                id: Uuid::parse_str(&id)?,
                email,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(records)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_then_verify() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let created = db
            .create_account(" Ada@Example.com ", "hunter22", id, Utc::now())
            .unwrap();
        assert_eq!(created.email.as_deref(), Some("ada@example.com"));

        let verified = db.verify_credentials("ada@example.com", "hunter22").unwrap();
        assert_eq!(verified.id, id);
    }

    #[test]
    fn test_wrong_password_and_unknown_email() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("ada@example.com", "hunter22", Uuid::new_v4(), Utc::now())
            .unwrap();

        assert!(matches!(
            db.verify_credentials("ada@example.com", "hunter23"),
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            db.verify_credentials("bob@example.com", "hunter22"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_duplicate_email_is_a_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("ada@example.com", "hunter22", Uuid::new_v4(), Utc::now())
            .unwrap();
        let err = db
            .create_account("ADA@example.com", "hunter22", Uuid::new_v4(), Utc::now())
            .unwrap_err();
        assert!(matches!(
            teamdesk_shared::BackendError::from(err),
            teamdesk_shared::BackendError::Rejected(_)
        ));
    }

    #[test]
    fn test_sign_up_validation() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.create_account("no-at-sign", "hunter22", Uuid::new_v4(), Utc::now()),
            Err(StoreError::InvalidSignUp(_))
        ));
        assert!(matches!(
            db.create_account("ada@example.com", "short", Uuid::new_v4(), Utc::now()),
            Err(StoreError::InvalidSignUp(_))
        ));
    }

    #[test]
    fn test_list_accounts_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        let first = db
            .create_account("a@example.com", "password", Uuid::new_v4(), t0)
            .unwrap();
        let second = db
            .create_account(
                "b@example.com",
                "password",
                Uuid::new_v4(),
                t0 + chrono::Duration::seconds(1),
            )
            .unwrap();

        let ids: Vec<_> = db.list_accounts().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
