// Identity resolution: find or provision the member's account, then make sure
// the profile and access role rows exist.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::store::{AccessRoleRow, IdentityStore, NewIdentity, ProfileRow, RecordStore, StoreError};
use crate::types::WorkflowSettings;
use crate::util::parse_display_name;

/// Who to resolve, and the company names they selected.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub primary_email: String,
    /// The first entry becomes the profile's company name.
    pub selected_companies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub identity_id: String,
    pub was_created: bool,
    /// Non-fatal failures (credential reset, profile and role writes).
    pub warnings: Vec<String>,
}

/// Failures that leave no identity to attach records to.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Identity lookup failed: {0}")]
    Lookup(StoreError),

    #[error("Failed to create user: {0}")]
    Creation(StoreError),
}

/// Company name stored on the profile: the first selection without its year.
fn profile_company_name(selected: &[String]) -> Option<String> {
    selected
        .first()
        .map(|name| parse_display_name(name).0)
        .filter(|name| !name.is_empty())
}

/// Find the identity for `request.primary_email`, or create it.
///
/// Only a failed lookup or a failed creation is an error; everything after
/// that is reported in `warnings`. Creation is never retried.
pub async fn resolve_identity(
    records: &Arc<dyn RecordStore>,
    identities: &Arc<dyn IdentityStore>,
    request: &ResolveRequest,
    settings: &WorkflowSettings,
) -> Result<ResolvedIdentity, ResolveError> {
    let policy = &settings.policy;
    let email = request.primary_email.trim();
    let company_name = profile_company_name(&request.selected_companies);

    let existing = policy
        .idempotent("find identity", || identities.find_by_email(email))
        .await
        .map_err(ResolveError::Lookup)?;

    let mut warnings = Vec::new();

    if let Some(identity) = existing {
        log::info!("Reusing identity {} for {}", identity.id, email);

        if let Err(e) = policy
            .idempotent("reset credential", || {
                identities.update_credential(&identity.id, &settings.default_credential)
            })
            .await
        {
            log::warn!("Credential reset for {} failed: {}", identity.id, e);
            warnings.push(format!("Password update: {}", e));
        }
        if let Err(e) = policy
            .idempotent("confirm email", || identities.confirm_email(&identity.id))
            .await
        {
            log::warn!("Email confirmation for {} failed: {}", identity.id, e);
            warnings.push(format!("Email confirmation: {}", e));
        }

        let profile = ProfileRow {
            id: identity.id.clone(),
            email: email.to_string(),
            company_name,
        };
        if let Err(e) = policy
            .idempotent("upsert profile", || records.upsert_profile(&profile))
            .await
        {
            log::warn!("Profile upsert for {} failed: {}", identity.id, e);
            warnings.push(format!("Profile update: {}", e));
        }

        let role = AccessRoleRow {
            user_id: identity.id.clone(),
            email: email.to_string(),
            role: settings.default_role.clone(),
        };
        if let Err(e) = policy
            .idempotent("upsert role", || records.upsert_access_role(&role))
            .await
        {
            log::warn!("Role upsert for {} failed: {}", identity.id, e);
            warnings.push(format!("Role update: {}", e));
        }

        return Ok(ResolvedIdentity {
            identity_id: identity.id,
            was_created: false,
            warnings,
        });
    }

    let new_identity = NewIdentity {
        email: email.to_string(),
        credential: settings.default_credential.clone(),
        email_confirmed: true,
        metadata: serde_json::json!({
            "company_consolidated": true,
            "consolidated_at": chrono::Utc::now().to_rfc3339(),
        }),
    };
    let identity = policy
        .once(identities.create_identity(&new_identity))
        .await
        .map_err(|e| {
            log::error!("Identity creation for {} failed: {}", email, e);
            ResolveError::Creation(e)
        })?;
    log::info!("Created identity {} for {}", identity.id, email);

    // A prior partial run may already have written these rows.
    let profile = ProfileRow {
        id: identity.id.clone(),
        email: email.to_string(),
        company_name,
    };
    match policy
        .idempotent("insert profile", || records.insert_profile(&profile))
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_conflict() => log::debug!("Profile {} already exists", identity.id),
        Err(e) => {
            log::warn!("Profile creation for {} failed: {}", identity.id, e);
            warnings.push(format!("Profile creation: {}", e));
        }
    }

    let role = AccessRoleRow {
        user_id: identity.id.clone(),
        email: email.to_string(),
        role: settings.default_role.clone(),
    };
    match policy
        .idempotent("insert role", || records.insert_access_role(&role))
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_conflict() => log::debug!("Role for {} already exists", identity.id),
        Err(e) => {
            log::warn!("Role assignment for {} failed: {}", identity.id, e);
            warnings.push(format!("Role assignment: {}", e));
        }
    }

    Ok(ResolvedIdentity {
        identity_id: identity.id,
        was_created: true,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::db::test_utils::test_db;
    use crate::store::sqlite::SqliteBackend;
    use crate::store::testing::{FaultyRecords, ScanningIdentities};
    use crate::types::DEFAULT_CREDENTIAL;

    fn request(email: &str) -> ResolveRequest {
        ResolveRequest {
            primary_email: email.to_string(),
            selected_companies: vec!["Acme Fund (2021)".to_string(), "Beta".to_string()],
        }
    }

    async fn seed_identity(backend: &SqliteBackend, email: &str) -> String {
        backend
            .create_identity(&NewIdentity {
                email: email.to_string(),
                credential: "old-secret".to_string(),
                email_confirmed: false,
                metadata: serde_json::Value::Null,
            })
            .await
            .expect("seed identity")
            .id
    }

    #[tokio::test]
    async fn test_existing_identity_is_reset_not_created() {
        let backend = SqliteBackend::new(test_db());
        let existing_id = seed_identity(&backend, "lisa@co.org").await;
        let scanning = ScanningIdentities::new(backend.clone(), 2);
        let identities: Arc<dyn IdentityStore> = scanning.clone();
        let records: Arc<dyn RecordStore> = Arc::new(backend.clone());

        let resolved = resolve_identity(&records, &identities, &request(" LISA@co.org "), &WorkflowSettings::default())
            .await
            .expect("resolve");

        assert_eq!(resolved.identity_id, existing_id);
        assert!(!resolved.was_created);
        assert!(resolved.warnings.is_empty());
        assert_eq!(scanning.creates.load(Ordering::SeqCst), 0);

        backend.with_db(|db| {
            assert!(db
                .verify_identity_credential(&existing_id, DEFAULT_CREDENTIAL)
                .expect("verify"));
            let identity = db.get_identity(&existing_id).expect("get").expect("exists");
            assert!(identity.email_confirmed);
            let profile = db.get_profile(&existing_id).expect("get").expect("profile");
            assert_eq!(profile.company_name.as_deref(), Some("Acme Fund"));
            let role = db.get_user_role(&existing_id).expect("get").expect("role");
            assert_eq!(role.role, "viewer");
        });
    }

    #[tokio::test]
    async fn test_new_identity_gets_profile_and_role() {
        let backend = SqliteBackend::new(test_db());
        let scanning = ScanningIdentities::new(backend.clone(), 1000);
        let identities: Arc<dyn IdentityStore> = scanning.clone();
        let records: Arc<dyn RecordStore> = Arc::new(backend.clone());

        let resolved = resolve_identity(&records, &identities, &request("new@co.org"), &WorkflowSettings::default())
            .await
            .expect("resolve");

        assert!(resolved.was_created);
        assert!(resolved.warnings.is_empty());
        assert_eq!(scanning.creates.load(Ordering::SeqCst), 1);
        backend.with_db(|db| {
            assert_eq!(db.count_identities().expect("count"), 1);
            assert_eq!(db.count_user_roles().expect("count"), 1);
            let identity = db.get_identity(&resolved.identity_id).expect("get").expect("exists");
            assert!(identity.email_confirmed);
            assert!(identity.metadata.unwrap_or_default().contains("company_consolidated"));
            assert!(db.get_profile(&resolved.identity_id).expect("get").is_some());
        });
    }

    #[tokio::test]
    async fn test_second_resolve_reuses_identity() {
        let backend = SqliteBackend::new(test_db());
        let scanning = ScanningIdentities::new(backend.clone(), 1000);
        let identities: Arc<dyn IdentityStore> = scanning.clone();
        let records: Arc<dyn RecordStore> = Arc::new(backend.clone());
        let settings = WorkflowSettings::default();

        let first = resolve_identity(&records, &identities, &request("new@co.org"), &settings)
            .await
            .expect("first");
        let second = resolve_identity(&records, &identities, &request("New@Co.org"), &settings)
            .await
            .expect("second");

        assert_eq!(first.identity_id, second.identity_id);
        assert!(!second.was_created);
        assert_eq!(scanning.creates.load(Ordering::SeqCst), 1);
        backend.with_db(|db| assert_eq!(db.count_user_roles().expect("count"), 1));
    }

    #[tokio::test]
    async fn test_credential_failure_is_a_warning() {
        let backend = SqliteBackend::new(test_db());
        seed_identity(&backend, "lisa@co.org").await;
        let scanning = ScanningIdentities::new(backend.clone(), 1000);
        *scanning.fail_credential.lock() = true;
        let identities: Arc<dyn IdentityStore> = scanning;
        let records: Arc<dyn RecordStore> = Arc::new(backend);

        let resolved = resolve_identity(&records, &identities, &request("lisa@co.org"), &WorkflowSettings::default())
            .await
            .expect("still resolves");

        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].starts_with("Password update:"));
    }

    #[tokio::test]
    async fn test_profile_failure_is_a_warning() {
        let backend = SqliteBackend::new(test_db());
        let faulty = FaultyRecords::new(backend.clone());
        *faulty.fail_profile_writes.lock() = true;
        let records: Arc<dyn RecordStore> = faulty;
        let identities: Arc<dyn IdentityStore> = Arc::new(backend.clone());

        let resolved = resolve_identity(&records, &identities, &request("new@co.org"), &WorkflowSettings::default())
            .await
            .expect("resolve");

        assert!(resolved.was_created);
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].starts_with("Profile creation:"));
        backend.with_db(|db| assert_eq!(db.count_user_roles().expect("count"), 1));
    }

    #[tokio::test]
    async fn test_creation_failure_is_fatal_and_not_retried() {
        let backend = SqliteBackend::new(test_db());
        let scanning = ScanningIdentities::new(backend.clone(), 1000);
        *scanning.fail_create.lock() = true;
        let identities: Arc<dyn IdentityStore> = scanning.clone();
        let records: Arc<dyn RecordStore> = Arc::new(backend.clone());

        let err = resolve_identity(&records, &identities, &request("new@co.org"), &WorkflowSettings::default())
            .await
            .expect_err("creation fails");

        assert!(matches!(err, ResolveError::Creation(_)));
        assert_eq!(scanning.creates.load(Ordering::SeqCst), 1);
        backend.with_db(|db| assert_eq!(db.count_user_roles().expect("count"), 0));
    }
}
