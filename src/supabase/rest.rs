//! `RecordStore` over PostgREST.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use super::{SupabaseClient, SupabaseError};
use crate::store::{AccessRoleRow, ProfileRow, RecordStore, StoreError, SurveyPatch, SurveyRecord};
use crate::year_tables::{YearTable, LINK_COLUMN};

const PROFILES_TABLE: &str = "user_profiles";
const ROLES_TABLE: &str = "user_roles";

/// Escape `%`, `_` and `\` so the fragment matches literally inside `ilike`.
fn like_escape(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Double-quote a value for a PostgREST logic tree, escaping `"` and `\`.
fn quote_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// `or` filter matching the fragment in any of the table's organisation columns.
///
/// Example: `(organisation_name.ilike."*acme*",fund_name.ilike."*acme*")`
fn organisation_filter(table: &YearTable, fragment: &str) -> String {
    let pattern = quote_value(&format!("*{}*", like_escape(fragment.trim())));
    let clauses: Vec<String> = table
        .organization_columns
        .iter()
        .map(|column| format!("{}.ilike.{}", column, pattern))
        .collect();
    format!("({})", clauses.join(","))
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str(row: &Value, column: &str) -> Option<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Convert one PostgREST row into a `SurveyRecord`. Rows without an id are dropped.
fn row_to_record(table: &YearTable, row: &Value) -> Option<SurveyRecord> {
    let id = row.get("id").and_then(id_to_string)?;
    let names = table
        .organization_columns
        .iter()
        .filter_map(|column| non_empty_str(row, column))
        .collect();
    Some(SurveyRecord {
        id,
        year: table.year,
        names,
        email: non_empty_str(row, table.email_column),
        linked_user_id: non_empty_str(row, LINK_COLUMN),
    })
}

fn rows_to_records(table: &YearTable, rows: &[Value]) -> Vec<SurveyRecord> {
    let records: Vec<SurveyRecord> = rows
        .iter()
        .filter_map(|row| row_to_record(table, row))
        .collect();
    if records.len() < rows.len() {
        log::warn!(
            "{}: dropped {} rows without an id",
            table.table,
            rows.len() - records.len()
        );
    }
    records
}

impl SupabaseClient {
    fn table_url(&self, table: &str) -> Result<url::Url, SupabaseError> {
        self.url(&format!("rest/v1/{}", table))
    }

    async fn select_rows(
        &self,
        table: &YearTable,
        filter: (&str, String),
        limit: Option<u32>,
    ) -> Result<Vec<Value>, SupabaseError> {
        let mut url = self.table_url(table.table)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", &table.select_columns().join(","));
            query.append_pair(filter.0, &filter.1);
            query.append_pair("order", "id.asc");
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn insert_row(
        &self,
        table: &str,
        body: Value,
        on_conflict: Option<&str>,
    ) -> Result<(), SupabaseError> {
        let mut url = self.table_url(table)?;
        let prefer = match on_conflict {
            Some(key) => {
                url.query_pairs_mut().append_pair("on_conflict", key);
                "resolution=merge-duplicates,return=minimal"
            }
            None => "return=minimal",
        };
        self.send(self.request(Method::POST, url).header("Prefer", prefer).json(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SupabaseClient {
    async fn find_survey_records(
        &self,
        table: &YearTable,
        fragment: &str,
    ) -> Result<Vec<SurveyRecord>, StoreError> {
        let rows = self
            .select_rows(table, ("or", organisation_filter(table, fragment)), None)
            .await?;
        Ok(rows_to_records(table, &rows))
    }

    async fn find_linked_record(
        &self,
        table: &YearTable,
        user_id: &str,
    ) -> Result<Option<SurveyRecord>, StoreError> {
        let rows = self
            .select_rows(table, (LINK_COLUMN, format!("eq.{}", user_id)), Some(1))
            .await?;
        Ok(rows_to_records(table, &rows).into_iter().next())
    }

    async fn update_survey_record(
        &self,
        table: &YearTable,
        id: &str,
        patch: &SurveyPatch,
    ) -> Result<(), StoreError> {
        let mut body = Map::new();
        body.insert(table.email_column.to_string(), json!(patch.email));
        if let Some(user_id) = &patch.link_user_id {
            body.insert(LINK_COLUMN.to_string(), json!(user_id));
        }

        let mut url = self.table_url(table.table).map_err(StoreError::from)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id))
            .append_pair("select", "id");
        let updated: Vec<Value> = self
            .send_json(
                self.request(Method::PATCH, url)
                    .header("Prefer", "return=representation")
                    .json(&Value::Object(body)),
            )
            .await?;
        if updated.is_empty() {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("{} has no row {}", table.table, id),
            });
        }
        Ok(())
    }

    async fn insert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        self.insert_row(PROFILES_TABLE, profile_body(profile), None)
            .await?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: &ProfileRow) -> Result<(), StoreError> {
        self.insert_row(PROFILES_TABLE, profile_body(profile), Some("id"))
            .await?;
        Ok(())
    }

    async fn insert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.insert_row(ROLES_TABLE, role_body(role), None).await?;
        Ok(())
    }

    async fn upsert_access_role(&self, role: &AccessRoleRow) -> Result<(), StoreError> {
        self.insert_row(ROLES_TABLE, role_body(role), Some("user_id"))
            .await?;
        Ok(())
    }
}

fn profile_body(profile: &ProfileRow) -> Value {
    json!({
        "id": profile.id,
        "email": profile.email,
        "company_name": profile.company_name,
    })
}

fn role_body(role: &AccessRoleRow) -> Value {
    json!({
        "user_id": role.user_id,
        "email": role.email,
        "role": role.role,
    })
}
