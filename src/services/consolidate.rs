// Consolidation: resolve the member's identity, then migrate the selected
// companies' survey records onto it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PortalError;
use crate::services::identity::{resolve_identity, ResolveRequest};
use crate::services::migrate::migrate_records;
use crate::state::AppState;
use crate::util::looks_like_email;

#[derive(Debug, Clone)]
pub struct ConsolidateRequest {
    pub primary_email: String,
    pub selected_companies: Vec<String>,
}

/// How much of the consolidation went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// No errors. Includes the case where nothing matched.
    Full,
    /// Some records updated, some steps failed.
    Partial,
    /// Steps failed and nothing was updated.
    None,
}

impl Outcome {
    fn classify(total_updated: usize, error_count: usize) -> Self {
        match (error_count, total_updated) {
            (0, _) => Outcome::Full,
            (_, 0) => Outcome::None,
            _ => Outcome::Partial,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub outcome: Outcome,
    pub success: bool,
    pub total_updated: usize,
    pub per_year: BTreeMap<u16, usize>,
    pub user_id: String,
    pub user_created: bool,
    /// Resolver warnings followed by migration errors.
    pub errors: Vec<String>,
    pub message: String,
}

fn validate(request: &ConsolidateRequest) -> Result<(String, Vec<String>), PortalError> {
    let email = request.primary_email.trim();
    let selected: Vec<String> = request
        .selected_companies
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !looks_like_email(email) || selected.is_empty() {
        return Err(PortalError::MissingFields);
    }
    Ok((email.to_string(), selected))
}

fn summary(outcome: Outcome, user_created: bool, total_updated: usize) -> String {
    let account = if user_created { "created" } else { "updated" };
    match outcome {
        Outcome::Full => format!(
            "User account {} successfully. {} survey record(s) linked. You can now sign in with the default password.",
            account, total_updated
        ),
        Outcome::Partial => format!(
            "User account {}. {} survey record(s) linked; some steps failed, see errors.",
            account, total_updated
        ),
        Outcome::None => format!(
            "User account {}, but no survey records could be linked; see errors.",
            account
        ),
    }
}

/// Run the whole consolidation for one member.
///
/// Errors only when the request is incomplete or no identity could be
/// resolved; everything else is reported in the returned report.
pub async fn consolidate(
    state: &AppState,
    request: &ConsolidateRequest,
) -> Result<ConsolidationReport, PortalError> {
    let (email, selected) = validate(request)?;
    let settings = state.settings();

    let resolved = resolve_identity(
        &state.records,
        &state.identities,
        &ResolveRequest {
            primary_email: email.clone(),
            selected_companies: selected.clone(),
        },
        &settings,
    )
    .await?;

    let migration = migrate_records(
        &state.records,
        &resolved.identity_id,
        &email,
        &selected,
        &settings,
    )
    .await;

    let total_updated = migration.total_updated();
    let mut errors = resolved.warnings;
    errors.extend(migration.errors);
    let outcome = Outcome::classify(total_updated, errors.len());

    log::info!(
        "Consolidated {} into {}: {:?}, {} record(s), {} error(s)",
        selected.join(", "),
        resolved.identity_id,
        outcome,
        total_updated,
        errors.len()
    );

    Ok(ConsolidationReport {
        outcome,
        success: outcome != Outcome::None,
        total_updated,
        per_year: migration.per_year,
        user_id: resolved.identity_id,
        user_created: resolved.was_created,
        errors,
        message: summary(outcome, resolved.was_created, total_updated),
    })
}
