//! Hosted backend over the managed service's HTTP surfaces.
//!
//! Modules:
//! - rest: survey tables, profiles and roles through PostgREST (`/rest/v1`)
//! - auth: identities through the auth admin API (`/auth/v1/admin/users`)
//!
//! Requests are sent once. Retrying is the caller's `CallPolicy`, which knows
//! which calls are safe to repeat.

pub mod auth;
pub mod rest;

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::store::StoreError;
use crate::types::Config;

/// PostgreSQL unique_violation.
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        code: Option<String>,
    },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: u16) -> RetryDecision {
    if status == 429 || status == 408 || (500..600).contains(&status) {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Http(e) if e.is_timeout() || e.is_connect() => {
                StoreError::Transient(e.to_string())
            }
            SupabaseError::ApiError {
                status,
                message,
                code,
            } => {
                if status == 409 || code.as_deref() == Some(PG_UNIQUE_VIOLATION) {
                    StoreError::Conflict(message)
                } else if retry_decision_for_status(status) == RetryDecision::Retryable {
                    StoreError::Transient(format!("{}: {}", status, message))
                } else {
                    StoreError::Rejected { status, message }
                }
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub base_url: Url,
    pub service_key: String,
    pub timeout: Duration,
    pub identity_page_size: u32,
}

impl SupabaseConfig {
    pub fn from_config(config: &Config) -> Result<Self, SupabaseError> {
        let raw = config
            .supabase_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SupabaseError::MissingConfig("supabaseUrl"))?;
        let service_key = config
            .service_role_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SupabaseError::MissingConfig("serviceRoleKey"))?;
        // Trailing slash so relative joins keep any path prefix.
        let base_url = if raw.ends_with('/') {
            Url::parse(raw)?
        } else {
            Url::parse(&format!("{}/", raw))?
        };
        Ok(Self {
            base_url,
            service_key: service_key.to_string(),
            timeout: Duration::from_secs(config.call_timeout_secs.max(1)),
            identity_page_size: config.identity_page_size.max(1),
        })
    }
}

/// Authenticated HTTP client shared by the REST and auth halves.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn identity_page_size(&self) -> u32 {
        self.config.identity_page_size
    }

    fn url(&self, path: &str) -> Result<Url, SupabaseError> {
        Ok(self.config.base_url.join(path)?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    /// Send once; non-2xx responses become `SupabaseError::ApiError`.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SupabaseError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (message, code) = parse_error_body(&body);
        log::debug!("supabase {} -> {}: {}", status, message, body);
        Err(SupabaseError::ApiError {
            status: status.as_u16(),
            message,
            code,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SupabaseError> {
        let response = self.send(request).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pull a message and a string error code out of a PostgREST or auth error body.
fn parse_error_body(body: &str) -> (String, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (body.trim().to_string(), None);
    };
    let message = ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let code = value
        .get("code")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    (message, code)
}
