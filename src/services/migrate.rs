// Record migration: claim one survey record per year for a resolved identity.
//
// Years are independent and run concurrently. Inside a year the selected names
// are handled in order, because two names can match different rows and only
// one of them may carry the identity's link.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::services::search::tables_for;
use crate::store::{CallPolicy, RecordStore, StoreError, SurveyPatch, SurveyRecord};
use crate::types::WorkflowSettings;
use crate::util::{compare_record_ids, parse_display_name};
use crate::year_tables::{YearTable, SURVEY_TABLES};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Successful writes per year, one per selected name that landed on a
    /// record. Every configured year is present.
    pub per_year: BTreeMap<u16, usize>,
    /// `"{year}: {message}"` for every failed read or write.
    pub errors: Vec<String>,
}

impl MigrationReport {
    pub fn total_updated(&self) -> usize {
        self.per_year.values().sum()
    }
}

#[derive(Debug, Default)]
struct YearOutcome {
    updated: usize,
    errors: Vec<String>,
}

impl YearOutcome {
    fn fail(&mut self, table: &YearTable, e: StoreError) {
        log::warn!("Migration in {} failed: {}", table.table, e);
        self.errors.push(format!("{}: {}", table.year, e));
    }
}

/// Names to process per year table, in selection order.
fn partition_by_year(selected: &[String]) -> BTreeMap<u16, (&'static YearTable, Vec<String>)> {
    let mut plan: BTreeMap<u16, (&'static YearTable, Vec<String>)> = BTreeMap::new();
    for selection in selected {
        let (name, year) = parse_display_name(selection);
        if name.is_empty() {
            continue;
        }
        let tables = tables_for(year);
        if tables.is_empty() {
            log::warn!("No survey table for '{}', skipping", selection);
        }
        for table in tables {
            let names = &mut plan.entry(table.year).or_insert_with(|| (table, Vec::new())).1;
            if !names.contains(&name) {
                names.push(name.clone());
            }
        }
    }
    plan
}

/// Unlinked rows before rows linked elsewhere, then smallest id.
fn pick_candidate(matches: &[SurveyRecord]) -> Option<&SurveyRecord> {
    matches.iter().min_by(|a, b| {
        a.linked_user_id
            .is_some()
            .cmp(&b.linked_user_id.is_some())
            .then_with(|| compare_record_ids(&a.id, &b.id))
    })
}

async fn migrate_year(
    records: Arc<dyn RecordStore>,
    table: &'static YearTable,
    names: Vec<String>,
    identity_id: String,
    primary_email: String,
    policy: CallPolicy,
) -> YearOutcome {
    let year = table.year;
    let mut outcome = YearOutcome::default();
    // Record this identity holds in this year, once known.
    let mut owned: Option<String> = None;
    let mut owned_checked = false;

    for name in &names {
        let matches = match policy
            .idempotent(table.table, || records.find_survey_records(table, name))
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                outcome.fail(table, e);
                continue;
            }
        };
        if matches.is_empty() {
            log::debug!("No {} survey matches '{}'", year, name);
            continue;
        }

        if let Some(mine) = matches.iter().find(|r| r.is_linked_to(&identity_id)) {
            let patch = SurveyPatch {
                email: primary_email.clone(),
                link_user_id: None,
            };
            match policy
                .idempotent(table.table, || records.update_survey_record(table, &mine.id, &patch))
                .await
            {
                Ok(()) => {
                    outcome.updated += 1;
                    owned = Some(mine.id.clone());
                    owned_checked = true;
                }
                Err(e) => outcome.fail(table, e),
            }
            continue;
        }

        if !owned_checked {
            match policy
                .idempotent(table.table, || records.find_linked_record(table, &identity_id))
                .await
            {
                Ok(linked) => {
                    owned = linked.map(|r| r.id);
                    owned_checked = true;
                }
                Err(e) => {
                    outcome.fail(table, e);
                    continue;
                }
            }
        }
        if let Some(owned_id) = &owned {
            log::info!(
                "{} already links record {} to {}; leaving '{}' matches untouched",
                table.table,
                owned_id,
                identity_id,
                name
            );
            continue;
        }

        let Some(candidate) = pick_candidate(&matches) else {
            continue;
        };
        if let Some(previous) = &candidate.linked_user_id {
            log::info!(
                "Relinking {} record {} from {} to {}",
                year,
                candidate.id,
                previous,
                identity_id
            );
        }
        let patch = SurveyPatch {
            email: primary_email.clone(),
            link_user_id: Some(identity_id.clone()),
        };
        match policy
            .idempotent(table.table, || {
                records.update_survey_record(table, &candidate.id, &patch)
            })
            .await
        {
            Ok(()) => {
                log::info!("Linked {} record {} to {}", year, candidate.id, identity_id);
                outcome.updated += 1;
                owned = Some(candidate.id.clone());
            }
            Err(e) => outcome.fail(table, e),
        }
    }

    outcome
}

/// Claim the selected companies' survey records for `identity_id` and
/// rewrite their email to `primary_email`.
///
/// Never fails as a whole: per-year failures land in `errors` and the other
/// years still run.
pub async fn migrate_records(
    records: &Arc<dyn RecordStore>,
    identity_id: &str,
    primary_email: &str,
    selected: &[String],
    settings: &WorkflowSettings,
) -> MigrationReport {
    let mut set = JoinSet::new();
    for (_, (table, names)) in partition_by_year(selected) {
        let unit = migrate_year(
            Arc::clone(records),
            table,
            names,
            identity_id.to_string(),
            primary_email.trim().to_string(),
            settings.policy.clone(),
        );
        set.spawn(async move { (table.year, unit.await) });
    }

    let mut per_year: BTreeMap<u16, usize> = SURVEY_TABLES.iter().map(|t| (t.year, 0)).collect();
    let mut errors_by_year: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    let mut task_errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((year, outcome)) => {
                per_year.insert(year, outcome.updated);
                errors_by_year.insert(year, outcome.errors);
            }
            Err(e) => {
                log::error!("Migration task failed: {}", e);
                task_errors.push(format!("migration task failed: {}", e));
            }
        }
    }

    let mut errors: Vec<String> = errors_by_year.into_values().flatten().collect();
    errors.extend(task_errors);
    MigrationReport { per_year, errors }
}
