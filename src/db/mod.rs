//! SQLite-backed local store for survey submissions, profiles, roles, and identities.
//!
//! The database lives at `~/.escp/portal.db` unless the configuration points
//! elsewhere. It mirrors the hosted backend's tables closely enough that the
//! consolidation workflow behaves the same against either backend, which is
//! what the local backend is used for: offline runs, imports, and tests.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod identities;
pub mod profiles;
pub mod surveys;
pub mod types;
pub use types::*;

pub struct PortalDb {
    conn: Connection,
}

impl PortalDb {
    /// Borrow the underlying connection for ad-hoc queries.
    #[cfg(test)]
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.escp/portal.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps readers unblocked while a consolidation writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        log::debug!("Opened portal database at {}", path.display());
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.escp/portal.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".escp").join("portal.db"))
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::PortalDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// Test temp dirs are cleaned up by the OS.
    pub fn test_db() -> PortalDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        PortalDb::open_at(path).expect("Failed to open test database")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO user_profiles (id, email, updated_at) VALUES ('u1', 'a@b.org', 'now')",
                [],
            )?;
            Err(DbError::Migration("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM user_profiles", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO user_profiles (id, email, updated_at) VALUES ('u1', 'a@b.org', 'now')",
                [],
            )?;
            Ok(())
        })
        .expect("commit");

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM user_profiles", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("portal.db");
        {
            let db = PortalDb::open_at(path.clone()).expect("open");
            db.conn_ref()
                .execute(
                    "INSERT INTO survey_responses_2021 (firm_name, email_address) VALUES ('Acme', 'a@acme.org')",
                    [],
                )
                .expect("insert");
        }
        let db = PortalDb::open_at(path.clone()).expect("reopen");
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM survey_responses_2021", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }
}
