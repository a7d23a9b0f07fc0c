//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::CallPolicy;

/// Credential given to consolidated accounts until the member changes it.
pub const DEFAULT_CREDENTIAL: &str = "@ESCPNetwork2025#";

/// Role assigned to every consolidated account.
pub const DEFAULT_ROLE: &str = "viewer";

/// Which backend the stores talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite database on this machine.
    #[default]
    Local,
    /// Hosted backend (PostgREST tables + auth admin API).
    Supabase,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "sqlite" => Ok(BackendKind::Local),
            "supabase" | "hosted" => Ok(BackendKind::Supabase),
            other => Err(format!("Unknown backend: {}", other)),
        }
    }
}

/// Portal configuration, read from `~/.escp/config.json` with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,
    /// Local database path; defaults to `~/.escp/portal.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    /// Service-role key for the hosted backend. Prefer the environment variable.
    #[serde(default, skip_serializing)]
    pub service_role_key: Option<String>,
    #[serde(default = "default_credential", skip_serializing)]
    pub default_credential: String,
    #[serde(default = "default_role")]
    pub default_role: String,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_identity_page_size")]
    pub identity_page_size: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_credential() -> String {
    DEFAULT_CREDENTIAL.to_string()
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_call_timeout_secs() -> u64 {
    15
}

fn default_identity_page_size() -> u32 {
    1000
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            database_path: None,
            supabase_url: None,
            service_role_key: None,
            default_credential: default_credential(),
            default_role: default_role(),
            call_timeout_secs: default_call_timeout_secs(),
            identity_page_size: default_identity_page_size(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Config {
    /// Timeout and retry budget for store calls.
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
            max_attempts: self.retry_attempts.max(1),
            ..CallPolicy::default()
        }
    }

    /// Settings the services need, detached from backend wiring.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            default_credential: self.default_credential.clone(),
            default_role: self.default_role.clone(),
            policy: self.call_policy(),
        }
    }
}

/// What the consolidation services need from configuration.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub default_credential: String,
    pub default_role: String,
    pub policy: CallPolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Config::default().workflow_settings()
    }
}
