//! Ports between the consolidation workflow and the backends it runs against.
//!
//! The workflow only ever talks to a `RecordStore` (survey tables, profiles,
//! roles) and an `IdentityStore` (auth principals). Two backends implement
//! both: the local SQLite database (`sqlite`) and the hosted service
//! (`crate::supabase`).
//!
//! Every store call made by the services goes through a `CallPolicy`, which
//! bounds it with a timeout and retries the idempotent ones on retryable
//! errors.

pub mod sqlite;
#[cfg(test)]
pub mod testing;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;
use crate::year_tables::YearTable;

/// Errors surfaced by a store, classified by how the workflow reacts.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Unique-constraint violation. Swallowed where a row may already exist.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store call timed out after {0} seconds")]
    Timeout(u64),

    /// Connection problems, lock contention, 5xx, rate limits.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The store understood the request and refused it.
    #[error("Store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Transient(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_unique_violation() {
            return StoreError::Conflict(err.to_string());
        }
        match &err {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One survey submission, normalised across year tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    /// Opaque row id as the store reports it.
    pub id: String,
    pub year: u16,
    /// Non-empty organisation/fund names in the year's column order.
    pub names: Vec<String>,
    pub email: Option<String>,
    pub linked_user_id: Option<String>,
}

impl SurveyRecord {
    /// The record's primary organisation name (organisation before fund).
    pub fn organization_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    pub fn is_linked_to(&self, user_id: &str) -> bool {
        self.linked_user_id.as_deref() == Some(user_id)
    }
}

/// Fields written back to a survey row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyPatch {
    pub email: String,
    /// `Some` also sets the link column; `None` leaves it untouched.
    pub link_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRoleRow {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

/// Row-level access to survey tables, profiles, and access roles.
///
/// Single calls are atomic; nothing here spans rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows whose organisation column(s) contain `fragment`, case-insensitively.
    async fn find_survey_records(
        &self,
        table: &YearTable,
        fragment: &str,
    ) -> Result<Vec<SurveyRecord>, StoreError>;

    /// The row in this year's table linked to `user_id`, if any.
    async fn find_linked_record(
        &self,
        table: &YearTable,
        user_id: &str,
    ) -> Result<Option<SurveyRecord>, StoreError>;

    async fn update_survey_record(
        &self,
        table: &YearTable,
        id: &str,
        patch: &SurveyPatch,
    ) -> Result<(), StoreError>;

    /// Plain insert; an existing row yields `StoreError::Conflict`.
    async fn insert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError>;

    /// Insert or update keyed on `id`.
    async fn upsert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError>;

    /// Plain insert; an existing row yields `StoreError::Conflict`.
    async fn insert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError>;

    /// Insert or update keyed on `user_id`.
    async fn upsert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub email_confirmed: bool,
}

/// Request to provision an identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub credential: String,
    pub email_confirmed: bool,
    pub metadata: serde_json::Value,
}

/// Authentication principals.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// One page of identities. `page` is 1-based.
    async fn list_identities(&self, page: u32, per_page: u32) -> Result<Vec<Identity>, StoreError>;

    /// Page size used by the default `find_by_email` scan.
    fn scan_page_size(&self) -> u32 {
        1000
    }

    /// Exact, case-insensitive lookup by email.
    ///
    /// The default pages through `list_identities` until a match or a short
    /// page. Backends with an email index should override it.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let wanted = email.trim().to_lowercase();
        let per_page = self.scan_page_size().max(1);
        let mut page = 1;
        loop {
            let identities = self.list_identities(page, per_page).await?;
            if let Some(found) = identities
                .iter()
                .find(|i| i.email.trim().to_lowercase() == wanted)
            {
                return Ok(Some(found.clone()));
            }
            if (identities.len() as u32) < per_page {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn create_identity(&self, request: &NewIdentity) -> Result<Identity, StoreError>;

    async fn update_credential(&self, id: &str, credential: &str) -> Result<(), StoreError>;

    async fn confirm_email(&self, id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Call policy
// ---------------------------------------------------------------------------

/// Timeout and retry budget applied to every store call.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl CallPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exp.min(self.max_backoff_ms))
    }

    /// Run a single call under the timeout, without retrying.
    pub async fn once<T, Fut>(&self, fut: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_secs())),
        }
    }

    /// Run an idempotent call, retrying timeouts and transient failures.
    pub async fn idempotent<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.once(op()).await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "{} retry {}/{} after: {} (sleep {:?})",
                        label,
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_idempotent_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_policy();
        let result = policy
            .idempotent("test", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StoreError::Transient("flaky".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_idempotent_does_not_retry_conflict() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_policy();
        let result: Result<(), StoreError> = policy
            .idempotent("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Conflict("dup".to_string()))
                }
            })
            .await;
        assert!(result.expect_err("conflict").is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_times_out() {
        let policy = fast_policy();
        let result: Result<(), StoreError> = policy
            .once(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = CallPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(10), Duration::from_millis(2_000));
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let db = crate::db::test_utils::test_db();
        db.insert_profile("u1", "a@b.org", None).expect("insert");
        let err: StoreError = db.insert_profile("u1", "a@b.org", None).expect_err("dup").into();
        assert!(err.is_conflict());
    }
}
