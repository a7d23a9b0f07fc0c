use chrono::Utc;
use rusqlite::params;
use sha2::{Digest, Sha256};

use super::*;

/// Salted digest stored in place of a credential. The identity id is the salt.
pub fn credential_digest(identity_id: &str, credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity_id.as_bytes());
    hasher.update(b":");
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

impl PortalDb {
    // =========================================================================
    // Local identities (stand-in for the hosted auth service)
    // =========================================================================

    /// Create an identity. Emails are stored lowercased.
    pub fn insert_identity(
        &self,
        id: &str,
        email: &str,
        credential: &str,
        email_confirmed: bool,
        metadata: Option<&str>,
    ) -> Result<DbIdentity, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO auth_identities (
                id, email, credential_digest, email_confirmed, metadata, created_at, updated_at
             ) VALUES (?1, LOWER(?2), ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                email.trim(),
                credential_digest(id, credential),
                email_confirmed as i32,
                metadata,
                now
            ],
        )?;
        self.get_identity(id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_identity(&self, id: &str) -> Result<Option<DbIdentity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, email_confirmed, metadata, created_at, updated_at
             FROM auth_identities WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_identity_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Look up an identity by email (case-insensitive, indexed).
    pub fn get_identity_by_email(&self, email: &str) -> Result<Option<DbIdentity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, email_confirmed, metadata, created_at, updated_at
             FROM auth_identities WHERE email = LOWER(?1)",
        )?;
        let mut rows = stmt.query_map(params![email.trim()], Self::map_identity_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// One page of identities ordered by creation. `page` is 1-based.
    pub fn list_identities(&self, page: u32, per_page: u32) -> Result<Vec<DbIdentity>, DbError> {
        let offset = i64::from(page.max(1) - 1) * i64::from(per_page);
        let mut stmt = self.conn.prepare(
            "SELECT id, email, email_confirmed, metadata, created_at, updated_at
             FROM auth_identities ORDER BY created_at, id LIMIT ?1 OFFSET ?2",
        )?;
        let mapped = stmt.query_map(params![per_page, offset], Self::map_identity_row)?;
        let mut items = Vec::new();
        for row in mapped {
            items.push(row?);
        }
        Ok(items)
    }

    /// Replace the stored credential digest. Returns rows changed.
    pub fn set_identity_credential(&self, id: &str, credential: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE auth_identities SET credential_digest = ?1, updated_at = ?2 WHERE id = ?3",
            params![credential_digest(id, credential), Utc::now().to_rfc3339(), id],
        )?)
    }

    /// Mark the identity's email as confirmed. Returns rows changed.
    pub fn confirm_identity_email(&self, id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE auth_identities SET email_confirmed = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?)
    }

    /// Compare a credential against the stored digest.
    pub fn verify_identity_credential(&self, id: &str, credential: &str) -> Result<bool, DbError> {
        let stored: Option<String> = {
            let mut stmt = self
                .conn
                .prepare("SELECT credential_digest FROM auth_identities WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        Ok(stored.is_some_and(|digest| digest == credential_digest(id, credential)))
    }

    pub fn count_identities(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM auth_identities", [], |row| row.get(0))?)
    }

    fn map_identity_row(row: &rusqlite::Row) -> rusqlite::Result<DbIdentity> {
        Ok(DbIdentity {
            id: row.get(0)?,
            email: row.get(1)?,
            email_confirmed: row.get::<_, i32>(2)? != 0,
            metadata: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}
