// Record search service: company lookup across the year tables.
// Read-only. A failing table contributes no rows; the others still answer.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::relevance::{calculate_relevance, is_relevant, significant_words};
use crate::store::{CallPolicy, RecordStore, StoreError, SurveyRecord};
use crate::util::{contains_ci, display_name, normalize_name, parse_display_name};
use crate::year_tables::{table_for_year, YearTable, SURVEY_TABLES};

/// Shortest fragment worth querying for.
pub const MIN_SEARCH_LEN: usize = 2;

/// Ranked company entries returned alongside the raw matches.
pub const MAX_DETAILS: usize = 50;

/// A matched survey row as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRecord {
    pub id: String,
    pub year: u16,
    pub company: String,
    pub email: Option<String>,
}

/// One company in one year, scored against the search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDetail {
    pub name: String,
    pub year: u16,
    pub email: Option<String>,
    pub display_name: String,
    pub score: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Distinct company names, first-seen casing.
    pub companies: Vec<String>,
    /// Every matched row, undeduplicated.
    pub records: Vec<MatchedRecord>,
    pub details: Vec<CompanyDetail>,
    /// `"{year}: {message}"` for each table that failed.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEntry {
    pub email: String,
    pub company: String,
    pub year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyEntry {
    pub year: u16,
    pub company: String,
    pub email: String,
    pub id: String,
    pub table: String,
}

/// True when a trimmed fragment is long enough to search for.
pub fn is_searchable(fragment: &str) -> bool {
    fragment.trim().chars().count() >= MIN_SEARCH_LEN
}

/// Tables a selected display name applies to: its year's table when the
/// name carries a `(YYYY)` suffix, every table otherwise.
pub(crate) fn tables_for(year: Option<u16>) -> Vec<&'static YearTable> {
    match year {
        Some(year) => table_for_year(year).into_iter().collect(),
        None => SURVEY_TABLES.iter().collect(),
    }
}

/// Query `tables` concurrently for `fragment`, keyed by year.
pub(crate) async fn query_tables(
    records: &Arc<dyn RecordStore>,
    tables: &[&'static YearTable],
    fragment: &str,
    policy: &CallPolicy,
) -> BTreeMap<u16, Result<Vec<SurveyRecord>, StoreError>> {
    let mut set = JoinSet::new();
    for &table in tables {
        let records = Arc::clone(records);
        let fragment = fragment.to_string();
        let policy = policy.clone();
        set.spawn(async move {
            let result = policy
                .idempotent(table.table, || records.find_survey_records(table, &fragment))
                .await;
            (table.year, result)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((year, result)) => {
                results.insert(year, result);
            }
            Err(e) => log::error!("Survey query task failed: {}", e),
        }
    }
    results
}

/// Fallback searches run only while the phrase search leaves a table thin.
const WORD_MATCH_BELOW: usize = 20;
const PRIMARY_WORD_BELOW: usize = 10;
const PRIMARY_WORD_MIN_LEN: usize = 5;

/// A record accepted by the search, with the names that earned it a place.
struct Hit {
    record: SurveyRecord,
    names: Vec<String>,
}

/// Hits gathered from one table across strategies, one entry per record.
#[derive(Default)]
struct TableHits {
    hits: Vec<Hit>,
    by_id: HashMap<String, usize>,
    companies: HashSet<String>,
}

impl TableHits {
    /// Distinct companies found so far.
    fn len(&self) -> usize {
        self.companies.len()
    }

    fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    /// Keep the names of each row that pass `accept` and are relevant to `term`.
    fn absorb(&mut self, rows: Vec<SurveyRecord>, term: &str, accept: impl Fn(&str) -> bool) {
        for record in rows {
            let names: Vec<String> = record
                .names
                .iter()
                .filter(|name| accept(name.as_str()) && is_relevant(name, term))
                .cloned()
                .collect();
            if names.is_empty() {
                continue;
            }
            for name in &names {
                self.companies.insert(normalize_name(name));
            }
            match self.by_id.get(&record.id) {
                Some(&i) => {
                    let hit = &mut self.hits[i];
                    for name in names {
                        if !hit.names.contains(&name) {
                            hit.names.push(name);
                        }
                    }
                }
                None => {
                    self.by_id.insert(record.id.clone(), self.hits.len());
                    self.hits.push(Hit { record, names });
                }
            }
        }
    }
}

/// Longest word of at least `min_len` characters; the first one on ties.
fn longest_word(words: &[String], min_len: usize) -> Option<&str> {
    words
        .iter()
        .filter(|w| w.chars().count() >= min_len)
        .min_by_key(|w| Reverse(w.chars().count()))
        .map(String::as_str)
}

async fn fetch(
    records: &Arc<dyn RecordStore>,
    table: &'static YearTable,
    fragment: &str,
    policy: &CallPolicy,
) -> Result<Vec<SurveyRecord>, StoreError> {
    policy
        .idempotent(table.table, || records.find_survey_records(table, fragment))
        .await
}

/// Search one table: the whole phrase first, then progressively looser
/// fallbacks while results stay thin. Every accepted name must be relevant.
async fn search_table(
    records: &Arc<dyn RecordStore>,
    table: &'static YearTable,
    term: &str,
    policy: &CallPolicy,
) -> Result<Vec<Hit>, StoreError> {
    let mut found = TableHits::default();
    let rows = fetch(records, table, term, policy).await?;
    found.absorb(rows, term, |name| contains_ci(name, term));

    let significant = significant_words(term);

    // Every significant word present, in any order.
    if significant.len() >= 2 && found.len() < WORD_MATCH_BELOW {
        // A row holding all the words holds the longest one.
        if let Some(anchor) = longest_word(&significant, 1) {
            let rows = fetch(records, table, anchor, policy).await?;
            found.absorb(rows, term, |name| {
                let name = normalize_name(name);
                significant.iter().all(|w| name.contains(w.as_str()))
            });
        }
    }

    // The single most distinctive word.
    if found.len() < PRIMARY_WORD_BELOW {
        if let Some(primary) = longest_word(&significant, PRIMARY_WORD_MIN_LEN) {
            let rows = fetch(records, table, primary, policy).await?;
            found.absorb(rows, term, |name| contains_ci(name, primary));
        }
    }

    // "Agri Frontier" written as "AgriFrontier".
    if found.is_empty() && term.contains(char::is_whitespace) {
        let squashed: String = term.split_whitespace().collect();
        let rows = fetch(records, table, &squashed, policy).await?;
        found.absorb(rows, term, |name| contains_ci(name, &squashed));
    }

    log::debug!("{}: {} hits for '{}'", table.table, found.hits.len(), term);
    Ok(found.hits)
}

/// Names deduplicated by lowercased exact string, first-seen casing kept.
pub fn distinct_companies<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Search every year table for organisations matching `fragment`.
pub async fn search_companies(
    records: &Arc<dyn RecordStore>,
    fragment: &str,
    policy: &CallPolicy,
) -> SearchResult {
    let term = fragment.trim();
    if !is_searchable(term) {
        return SearchResult::default();
    }

    let mut set = JoinSet::new();
    for table in SURVEY_TABLES {
        let records = Arc::clone(records);
        let term = term.to_string();
        let policy = policy.clone();
        set.spawn(async move {
            let result = search_table(&records, table, &term, &policy).await;
            (table.year, result)
        });
    }
    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((year, result)) => {
                results.insert(year, result);
            }
            Err(e) => log::error!("Survey search task failed: {}", e),
        }
    }

    let mut out = SearchResult::default();
    let mut matched_names: Vec<String> = Vec::new();
    let mut seen_details: HashSet<(String, u16)> = HashSet::new();

    for (year, result) in results {
        let hits = match result {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("Search of {} failed: {}", year, e);
                out.errors.push(format!("{}: {}", year, e));
                continue;
            }
        };

        for Hit { record, names } in hits {
            for name in &names {
                matched_names.push(name.clone());
                if seen_details.insert((normalize_name(name), year)) {
                    out.details.push(CompanyDetail {
                        name: name.clone(),
                        year,
                        email: record.email.clone(),
                        display_name: display_name(name, year),
                        score: calculate_relevance(name, term),
                    });
                }
            }
            out.records.push(MatchedRecord {
                id: record.id,
                year,
                company: names.into_iter().next().unwrap_or_default(),
                email: record.email,
            });
        }
    }

    out.companies = distinct_companies(&matched_names);
    rank_details(&mut out.details);
    log::debug!(
        "Search '{}': {} companies, {} records, {} errors",
        term,
        out.companies.len(),
        out.records.len(),
        out.errors.len()
    );
    out
}

/// Best score first, then name, then newer year.
fn rank_details(details: &mut Vec<CompanyDetail>) {
    details.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| normalize_name(&a.name).cmp(&normalize_name(&b.name)))
            .then_with(|| b.year.cmp(&a.year))
    });
    details.truncate(MAX_DETAILS);
}

/// Contact emails recorded against the selected companies, one entry per
/// distinct email (case-insensitive, first seen wins).
pub async fn collect_emails(
    records: &Arc<dyn RecordStore>,
    selected: &[String],
    policy: &CallPolicy,
) -> Vec<EmailEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut emails = Vec::new();
    let tables = tables_for(None);

    for selection in selected {
        let (name, _) = parse_display_name(selection);
        if name.is_empty() {
            continue;
        }
        for (year, result) in query_tables(records, &tables, &name, policy).await {
            let rows = match result {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Email lookup for '{}' in {} failed: {}", name, year, e);
                    continue;
                }
            };
            for record in rows {
                let Some(email) = record.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
                else {
                    continue;
                };
                if seen.insert(email.to_lowercase()) {
                    emails.push(EmailEntry {
                        email: email.to_string(),
                        company: record.organization_name().unwrap_or_default().to_string(),
                        year,
                    });
                }
            }
        }
    }
    emails
}

/// Surveys whose organisation name equals a selected company exactly
/// (after normalisation), restricted to the selection's year when given.
pub async fn list_surveys(
    records: &Arc<dyn RecordStore>,
    selected: &[String],
    policy: &CallPolicy,
) -> Vec<SurveyEntry> {
    let mut surveys = Vec::new();

    for selection in selected {
        let (name, year) = parse_display_name(selection);
        if name.is_empty() {
            continue;
        }
        let wanted = normalize_name(&name);
        let tables = tables_for(year);
        for (year, result) in query_tables(records, &tables, &wanted, policy).await {
            let rows = match result {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Survey lookup for '{}' in {} failed: {}", name, year, e);
                    continue;
                }
            };
            let Some(table) = table_for_year(year) else {
                continue;
            };
            for record in rows {
                let Some(company) = record.organization_name() else {
                    continue;
                };
                if normalize_name(company) != wanted {
                    continue;
                }
                surveys.push(SurveyEntry {
                    year,
                    company: company.to_string(),
                    email: record.email.clone().unwrap_or_default(),
                    id: record.id.clone(),
                    table: table.table.to_string(),
                });
            }
        }
    }
    surveys
}
