//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl DbError {
    /// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            ),
            _ => false,
        }
    }
}

/// A row from one of the `survey_responses_<year>` tables, normalised across years.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSurveyRow {
    pub id: i64,
    /// Non-empty organisation column values, in the year's column order.
    pub names: Vec<String>,
    pub email: Option<String>,
    pub user_id: Option<String>,
}

/// A row from the `user_profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProfile {
    pub id: String,
    pub email: String,
    pub company_name: Option<String>,
    pub updated_at: String,
}

/// A row from the `user_roles` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUserRole {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub updated_at: String,
}

/// A row from `auth_identities`. The credential digest is never selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIdentity {
    pub id: String,
    pub email: String,
    pub email_confirmed: bool,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
