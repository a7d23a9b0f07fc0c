//! Local backend: both ports implemented over the SQLite `PortalDb`.
//!
//! rusqlite connections are not `Sync`, so the database sits behind a
//! `parking_lot::Mutex`. Calls are short and synchronous; the async signatures
//! only exist to satisfy the ports.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    AccessRoleRow, Identity, IdentityStore, NewIdentity, ProfileRow, RecordStore, StoreError,
    SurveyPatch, SurveyRecord,
};
use crate::db::{DbError, DbIdentity, DbSurveyRow, PortalDb};
use crate::year_tables::YearTable;

#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<PortalDb>>,
}

impl SqliteBackend {
    pub fn new(db: PortalDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database at `path`, or the default location when `None`.
    pub fn open(path: Option<PathBuf>) -> Result<Self, DbError> {
        let db = match path {
            Some(path) => PortalDb::open_at(path)?,
            None => PortalDb::open()?,
        };
        Ok(Self::new(db))
    }

    /// Run a closure against the locked database.
    pub fn with_db<T>(&self, f: impl FnOnce(&PortalDb) -> T) -> T {
        let guard = self.db.lock();
        f(&guard)
    }
}

fn parse_row_id(id: &str) -> Result<i64, StoreError> {
    id.parse::<i64>().map_err(|_| StoreError::Rejected {
        status: 400,
        message: format!("Invalid survey row id: {}", id),
    })
}

fn to_record(table: &YearTable, row: DbSurveyRow) -> SurveyRecord {
    SurveyRecord {
        id: row.id.to_string(),
        year: table.year,
        names: row.names,
        email: row.email,
        linked_user_id: row.user_id,
    }
}

fn to_identity(row: DbIdentity) -> Identity {
    Identity {
        id: row.id,
        email: row.email,
        email_confirmed: row.email_confirmed,
    }
}

#[async_trait]
impl RecordStore for SqliteBackend {
    async fn find_survey_records(
        &self,
        table: &YearTable,
        fragment: &str,
    ) -> Result<Vec<SurveyRecord>, StoreError> {
        let rows = self.with_db(|db| db.find_survey_rows(table, fragment))?;
        Ok(rows.into_iter().map(|row| to_record(table, row)).collect())
    }

    async fn find_linked_record(
        &self,
        table: &YearTable,
        user_id: &str,
    ) -> Result<Option<SurveyRecord>, StoreError> {
        let row = self.with_db(|db| db.get_linked_survey_row(table, user_id))?;
        Ok(row.map(|row| to_record(table, row)))
    }

    async fn update_survey_record(
        &self,
        table: &YearTable,
        id: &str,
        patch: &SurveyPatch,
    ) -> Result<(), StoreError> {
        let row_id = parse_row_id(id)?;
        let changed = self.with_db(|db| {
            db.update_survey_row(table, row_id, &patch.email, patch.link_user_id.as_deref())
        })?;
        if changed == 0 {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("{} has no row {}", table.table, id),
            });
        }
        Ok(())
    }

    async fn insert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        self.with_db(|db| {
            db.insert_profile(&profile.id, &profile.email, profile.company_name.as_deref())
        })?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        self.with_db(|db| {
            db.upsert_profile(&profile.id, &profile.email, profile.company_name.as_deref())
        })?;
        Ok(())
    }

    async fn insert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.with_db(|db| db.insert_user_role(&role.user_id, &role.email, &role.role))?;
        Ok(())
    }

    async fn upsert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.with_db(|db| db.upsert_user_role(&role.user_id, &role.email, &role.role))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for SqliteBackend {
    async fn list_identities(&self, page: u32, per_page: u32) -> Result<Vec<Identity>, StoreError> {
        let rows = self.with_db(|db| db.list_identities(page, per_page))?;
        Ok(rows.into_iter().map(to_identity).collect())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let row = self.with_db(|db| db.get_identity_by_email(email))?;
        Ok(row.map(to_identity))
    }

    async fn create_identity(&self, request: &NewIdentity) -> Result<Identity, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let metadata = if request.metadata.is_null() {
            None
        } else {
            Some(request.metadata.to_string())
        };
        let row = self.with_db(|db| {
            db.with_transaction(|tx| {
                tx.insert_identity(
                    &id,
                    &request.email,
                    &request.credential,
                    request.email_confirmed,
                    metadata.as_deref(),
                )
            })
        })?;
        log::info!("Created local identity {} for {}", row.id, row.email);
        Ok(to_identity(row))
    }

    async fn update_credential(&self, id: &str, credential: &str) -> Result<(), StoreError> {
        let changed = self.with_db(|db| db.set_identity_credential(id, credential))?;
        if changed == 0 {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("Identity not found: {}", id),
            });
        }
        Ok(())
    }

    async fn confirm_email(&self, id: &str) -> Result<(), StoreError> {
        let changed = self.with_db(|db| db.confirm_identity_email(id))?;
        if changed == 0 {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("Identity not found: {}", id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::year_tables::SURVEY_2022;

    fn backend() -> SqliteBackend {
        SqliteBackend::new(test_db())
    }

    #[tokio::test]
    async fn test_records_round_through_ports() {
        let store = backend();
        let id = store
            .with_db(|db| db.insert_survey_row(&SURVEY_2022, &[Some("Acme Capital")], Some("x@acme.org")))
            .expect("seed");

        let found = store
            .find_survey_records(&SURVEY_2022, "ACME")
            .await
            .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id.to_string());
        assert_eq!(found[0].year, 2022);
        assert_eq!(found[0].organization_name(), Some("Acme Capital"));

        store
            .update_survey_record(
                &SURVEY_2022,
                &found[0].id,
                &SurveyPatch {
                    email: "lisa@acme.org".to_string(),
                    link_user_id: Some("u1".to_string()),
                },
            )
            .await
            .expect("update");

        let linked = store
            .find_linked_record(&SURVEY_2022, "u1")
            .await
            .expect("linked")
            .expect("exists");
        assert_eq!(linked.email.as_deref(), Some("lisa@acme.org"));
        assert!(linked.is_linked_to("u1"));
    }

    #[tokio::test]
    async fn test_update_unknown_row_is_rejected() {
        let store = backend();
        let patch = SurveyPatch {
            email: "a@b.org".to_string(),
            link_user_id: None,
        };
        let err = store
            .update_survey_record(&SURVEY_2022, "99", &patch)
            .await
            .expect_err("missing row");
        assert!(matches!(err, StoreError::Rejected { status: 404, .. }));

        let err = store
            .update_survey_record(&SURVEY_2022, "not-a-number", &patch)
            .await
            .expect_err("bad id");
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_insert_profile_conflict() {
        let store = backend();
        let profile = ProfileRow {
            id: "u1".to_string(),
            email: "a@b.org".to_string(),
            company_name: Some("Acme".to_string()),
        };
        store.insert_profile(&profile).await.expect("insert");
        let err = store.insert_profile(&profile).await.expect_err("dup");
        assert!(err.is_conflict());
        store.upsert_profile(&profile).await.expect("upsert is fine");
    }

    #[tokio::test]
    async fn test_identity_lifecycle() {
        let store = backend();
        let created = store
            .create_identity(&NewIdentity {
                email: "New@Co.org".to_string(),
                credential: "pw".to_string(),
                email_confirmed: true,
                metadata: serde_json::json!({ "company_consolidated": true }),
            })
            .await
            .expect("create");
        assert_eq!(created.email, "new@co.org");
        assert!(created.email_confirmed);

        let found = store
            .find_by_email("NEW@co.org")
            .await
            .expect("lookup")
            .expect("found");
        assert_eq!(found.id, created.id);

        store.update_credential(&created.id, "pw2").await.expect("reset");
        assert!(store.with_db(|db| db.verify_identity_credential(&created.id, "pw2").expect("verify")));

        let err = store.confirm_email("missing").await.expect_err("missing");
        assert!(matches!(err, StoreError::Rejected { status: 404, .. }));
    }
}
