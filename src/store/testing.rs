//! Failure-injecting store wrappers for service tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::sqlite::SqliteBackend;
use super::{
    AccessRoleRow, Identity, IdentityStore, NewIdentity, ProfileRow, RecordStore, StoreError,
    SurveyPatch, SurveyRecord,
};
use crate::year_tables::YearTable;

/// Wraps the local backend and fails chosen calls.
pub struct FaultyRecords {
    inner: SqliteBackend,
    pub fail_reads: Mutex<HashSet<u16>>,
    pub fail_updates: Mutex<HashSet<u16>>,
    pub fail_profile_writes: Mutex<bool>,
    pub updates: AtomicUsize,
}

impl FaultyRecords {
    pub fn new(inner: SqliteBackend) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: Mutex::new(HashSet::new()),
            fail_updates: Mutex::new(HashSet::new()),
            fail_profile_writes: Mutex::new(false),
            updates: AtomicUsize::new(0),
        })
    }

    pub fn fail_reads_for(&self, year: u16) {
        self.fail_reads.lock().insert(year);
    }

    pub fn fail_updates_for(&self, year: u16) {
        self.fail_updates.lock().insert(year);
    }
}

#[async_trait]
impl RecordStore for FaultyRecords {
    async fn find_survey_records(
        &self,
        table: &YearTable,
        fragment: &str,
    ) -> Result<Vec<SurveyRecord>, StoreError> {
        if self.fail_reads.lock().contains(&table.year) {
            return Err(StoreError::Backend(format!("{} unavailable", table.table)));
        }
        self.inner.find_survey_records(table, fragment).await
    }

    async fn find_linked_record(
        &self,
        table: &YearTable,
        user_id: &str,
    ) -> Result<Option<SurveyRecord>, StoreError> {
        if self.fail_reads.lock().contains(&table.year) {
            return Err(StoreError::Backend(format!("{} unavailable", table.table)));
        }
        self.inner.find_linked_record(table, user_id).await
    }

    async fn update_survey_record(
        &self,
        table: &YearTable,
        id: &str,
        patch: &SurveyPatch,
    ) -> Result<(), StoreError> {
        if self.fail_updates.lock().contains(&table.year) {
            return Err(StoreError::Rejected {
                status: 500,
                message: format!("write to {} failed", table.table),
            });
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_survey_record(table, id, patch).await
    }

    async fn insert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        if *self.fail_profile_writes.lock() {
            return Err(StoreError::Backend("profiles unavailable".to_string()));
        }
        self.inner.insert_profile(profile).await
    }

    async fn upsert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        if *self.fail_profile_writes.lock() {
            return Err(StoreError::Backend("profiles unavailable".to_string()));
        }
        self.inner.upsert_profile(profile).await
    }

    async fn insert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.inner.insert_access_role(role).await
    }

    async fn upsert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.inner.upsert_access_role(role).await
    }
}

/// Wraps the local backend, counts calls, and can fail credential resets or creation.
///
/// Does not override `find_by_email`, so lookups go through the paged scan.
pub struct ScanningIdentities {
    inner: SqliteBackend,
    pub page_size: u32,
    pub creates: AtomicUsize,
    pub pages_listed: AtomicUsize,
    pub fail_create: Mutex<bool>,
    pub fail_credential: Mutex<bool>,
}

impl ScanningIdentities {
    pub fn new(inner: SqliteBackend, page_size: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            page_size,
            creates: AtomicUsize::new(0),
            pages_listed: AtomicUsize::new(0),
            fail_create: Mutex::new(false),
            fail_credential: Mutex::new(false),
        })
    }
}

#[async_trait]
impl IdentityStore for ScanningIdentities {
    async fn list_identities(&self, page: u32, per_page: u32) -> Result<Vec<Identity>, StoreError> {
        self.pages_listed.fetch_add(1, Ordering::SeqCst);
        self.inner.list_identities(page, per_page).await
    }

    fn scan_page_size(&self) -> u32 {
        self.page_size
    }

    async fn create_identity(&self, request: &NewIdentity) -> Result<Identity, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock() {
            return Err(StoreError::Rejected {
                status: 422,
                message: "email rejected".to_string(),
            });
        }
        self.inner.create_identity(request).await
    }

    async fn update_credential(&self, id: &str, credential: &str) -> Result<(), StoreError> {
        if *self.fail_credential.lock() {
            return Err(StoreError::Rejected {
                status: 422,
                message: "password too weak".to_string(),
            });
        }
        self.inner.update_credential(id, credential).await
    }

    async fn confirm_email(&self, id: &str) -> Result<(), StoreError> {
        self.inner.confirm_email(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    #[tokio::test]
    async fn test_default_find_by_email_scans_pages() {
        let backend = SqliteBackend::new(test_db());
        for i in 0..5 {
            backend
                .create_identity(&NewIdentity {
                    email: format!("user{i}@co.org"),
                    credential: "pw".to_string(),
                    email_confirmed: true,
                    metadata: serde_json::Value::Null,
                })
                .await
                .expect("seed");
        }
        let store = ScanningIdentities::new(backend, 2);

        let found = store.find_by_email("USER4@co.org").await.expect("scan");
        assert!(found.is_some());
        assert!(store.pages_listed.load(Ordering::SeqCst) <= 3);

        let before = store.pages_listed.load(Ordering::SeqCst);
        let missing = store.find_by_email("nobody@co.org").await.expect("scan");
        assert!(missing.is_none());
        // 5 identities at 2 per page: pages 1..=3, the third is short.
        assert_eq!(store.pages_listed.load(Ordering::SeqCst) - before, 3);
    }
}
