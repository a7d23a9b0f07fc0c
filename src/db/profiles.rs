use chrono::Utc;
use rusqlite::params;

use super::*;

impl PortalDb {
    // =========================================================================
    // Profiles and access roles
    // =========================================================================

    /// Insert a profile row. Fails with a UNIQUE violation if the id exists.
    pub fn insert_profile(
        &self,
        id: &str,
        email: &str,
        company_name: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO user_profiles (id, email, company_name, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, email, company_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Insert or update a profile keyed on `id`.
    pub fn upsert_profile(
        &self,
        id: &str,
        email: &str,
        company_name: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO user_profiles (id, email, company_name, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                company_name = excluded.company_name,
                updated_at = excluded.updated_at",
            params![id, email, company_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<DbProfile>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, company_name, updated_at FROM user_profiles WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(DbProfile {
                id: row.get(0)?,
                email: row.get(1)?,
                company_name: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Insert a role row. Fails with a PRIMARY KEY violation if the user already has one.
    pub fn insert_user_role(&self, user_id: &str, email: &str, role: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO user_roles (user_id, email, role, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, email, role, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Insert or update a role keyed on `user_id`.
    pub fn upsert_user_role(&self, user_id: &str, email: &str, role: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO user_roles (user_id, email, role, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                role = excluded.role,
                updated_at = excluded.updated_at",
            params![user_id, email, role, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_user_role(&self, user_id: &str) -> Result<Option<DbUserRole>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, email, role, updated_at FROM user_roles WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![user_id], |row| {
            Ok(DbUserRole {
                user_id: row.get(0)?,
                email: row.get(1)?,
                role: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn count_user_roles(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM user_roles", [], |row| row.get(0))?)
    }
}
