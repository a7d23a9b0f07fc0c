//! Error types for portal requests
//!
//! Errors are classified by recoverability:
//! - Retryable: store timeouts, transient backend failures
//! - NonRetryable: malformed or incomplete requests
//! - RequiresUserAction: missing or broken configuration

use thiserror::Error;

use crate::services::identity::ResolveError;
use crate::store::StoreError;

/// Errors that end a request with a 4xx or 5xx response.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Missing required fields")]
    MissingFields,

    #[error("Invalid action")]
    InvalidAction(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Failed to look up user: {0}")]
    IdentityLookup(StoreError),

    #[error("Failed to create user: {0}")]
    IdentityCreation(StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PortalError {
    /// HTTP-style status for the response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::MissingFields
            | PortalError::InvalidAction(_)
            | PortalError::MalformedRequest(_) => 400,
            PortalError::IdentityLookup(_)
            | PortalError::IdentityCreation(_)
            | PortalError::Configuration(_) => 500,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PortalError::IdentityLookup(e) | PortalError::IdentityCreation(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, PortalError::Configuration(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PortalError::MissingFields => {
                "Provide primaryEmail and at least one entry in selectedCompanies."
            }
            PortalError::InvalidAction(_) => {
                "Use one of: search, getEmails, getSurveys, consolidate."
            }
            PortalError::MalformedRequest(_) => "Send a JSON object with an action field.",
            PortalError::IdentityLookup(_) => "The identity store did not answer. Try again.",
            PortalError::IdentityCreation(e) if e.is_retryable() => {
                "The identity store did not answer. Re-running is safe: the user is looked up first."
            }
            PortalError::IdentityCreation(_) => "Check the email address and try again.",
            PortalError::Configuration(_) => "Check your configuration in ~/.escp/config.json",
        }
    }
}

impl From<ResolveError> for PortalError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Lookup(e) => PortalError::IdentityLookup(e),
            ResolveError::Creation(e) => PortalError::IdentityCreation(e),
        }
    }
}

/// Serializable error representation for responses
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&PortalError> for WorkflowError {
    fn from(err: &PortalError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        WorkflowError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
