//! JSON action dispatch for the portal's company lookup surface.
//!
//! A request is one JSON object with an `action` and its parameters; the
//! response is an HTTP-style status plus a JSON body.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{PortalError, WorkflowError};
use crate::services::consolidate::{consolidate, ConsolidateRequest, ConsolidationReport};
use crate::services::search::{collect_emails, is_searchable, list_surveys, search_companies};
use crate::state::AppState;
use crate::year_tables::SURVEY_TABLES;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub action: String,
    #[serde(default, alias = "q", alias = "searchTerm")]
    pub company_name: Option<String>,
    #[serde(default)]
    pub selected_companies: Vec<String>,
    #[serde(default)]
    pub primary_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Search,
    GetEmails,
    GetSurveys,
    Consolidate,
}

impl FromStr for Action {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // Older clients still send the assistant and legacy search names.
            "search" | "aiSearch" | "legacySearch" => Ok(Action::Search),
            "getEmails" => Ok(Action::GetEmails),
            "getSurveys" => Ok(Action::GetSurveys),
            "consolidate" => Ok(Action::Consolidate),
            other => Err(PortalError::InvalidAction(other.to_string())),
        }
    }
}

/// Status and body returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub status: u16,
    pub body: Value,
}

impl CommandResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(err: &PortalError) -> Self {
        let status = err.status_code();
        let body = if status >= 500 {
            json!({
                "success": false,
                "error": err.to_string(),
                "details": WorkflowError::from(err),
            })
        } else {
            json!({ "error": err.to_string() })
        };
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Parse and run one request.
pub async fn dispatch(state: &AppState, request_json: &str) -> CommandResponse {
    match serde_json::from_str::<PortalRequest>(request_json) {
        Ok(request) => handle(state, request).await,
        Err(e) => {
            log::warn!("Rejected malformed request: {}", e);
            CommandResponse::error(&PortalError::MalformedRequest(e.to_string()))
        }
    }
}

pub async fn handle(state: &AppState, request: PortalRequest) -> CommandResponse {
    let action = match request.action.parse::<Action>() {
        Ok(action) => action,
        Err(e) => {
            log::warn!("Unknown action '{}'", request.action);
            return CommandResponse::error(&e);
        }
    };
    log::debug!("Dispatching {:?}", action);
    let policy = state.config.call_policy();

    match action {
        Action::Search => {
            let term = request.company_name.unwrap_or_default();
            if !is_searchable(&term) {
                return CommandResponse::ok(json!({
                    "companies": [],
                    "allRecords": [],
                    "companyDetails": [],
                    "error": "Search term must be at least 2 characters",
                }));
            }
            let result = search_companies(&state.records, &term, &policy).await;
            CommandResponse::ok(json!({
                "companies": result.companies,
                "allRecords": result.records,
                "companyDetails": result.details,
                "errors": result.errors,
            }))
        }
        Action::GetEmails => {
            let emails = if request.selected_companies.is_empty() {
                Vec::new()
            } else {
                collect_emails(&state.records, &request.selected_companies, &policy).await
            };
            CommandResponse::ok(json!({ "emails": emails }))
        }
        Action::GetSurveys => {
            let surveys = if request.selected_companies.is_empty() {
                Vec::new()
            } else {
                list_surveys(&state.records, &request.selected_companies, &policy).await
            };
            CommandResponse::ok(json!({ "surveys": surveys }))
        }
        Action::Consolidate => {
            let request = ConsolidateRequest {
                primary_email: request.primary_email.unwrap_or_default(),
                selected_companies: request.selected_companies,
            };
            match consolidate(state, &request).await {
                Ok(report) => CommandResponse::ok(consolidation_body(&report)),
                Err(e) => CommandResponse::error(&e),
            }
        }
    }
}

/// `details` carries an `updated{year}` counter for every configured year.
fn consolidation_body(report: &ConsolidationReport) -> Value {
    let mut details = Map::new();
    for table in SURVEY_TABLES.iter() {
        let count = report.per_year.get(&table.year).copied().unwrap_or(0);
        details.insert(format!("updated{}", table.year), json!(count));
    }
    details.insert("userCreated".to_string(), json!(report.user_created));
    details.insert("userId".to_string(), json!(report.user_id));
    details.insert("errors".to_string(), json!(report.errors));

    json!({
        "success": report.success,
        "outcome": report.outcome,
        "totalUpdated": report.total_updated,
        "details": details,
        "userId": report.user_id,
        "userCreated": report.user_created,
        "message": report.message,
    })
}
