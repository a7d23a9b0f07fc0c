use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::PortalError;
use crate::store::sqlite::SqliteBackend;
use crate::store::{IdentityStore, RecordStore};
use crate::supabase::{SupabaseClient, SupabaseConfig};
use crate::types::{BackendKind, Config, WorkflowSettings};

/// Shared state for request handling: configuration plus the two stores.
pub struct AppState {
    pub config: Config,
    pub records: Arc<dyn RecordStore>,
    pub identities: Arc<dyn IdentityStore>,
}

impl AppState {
    /// Build the configured backend.
    pub fn new(config: Config) -> Result<Self, PortalError> {
        match config.backend {
            BackendKind::Local => {
                let path = config.database_path.as_ref().map(PathBuf::from);
                let backend = SqliteBackend::open(path)
                    .map_err(|e| PortalError::Configuration(format!("Local database: {}", e)))?;
                log::info!("Using local backend");
                let backend = Arc::new(backend);
                Ok(Self::with_stores(config, backend.clone(), backend))
            }
            BackendKind::Supabase => {
                let client = SupabaseConfig::from_config(&config)
                    .and_then(SupabaseClient::new)
                    .map_err(|e| PortalError::Configuration(e.to_string()))?;
                log::info!("Using hosted backend");
                let client = Arc::new(client);
                Ok(Self::with_stores(config, client.clone(), client))
            }
        }
    }

    pub fn with_stores(
        config: Config,
        records: Arc<dyn RecordStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            config,
            records,
            identities,
        }
    }

    pub fn settings(&self) -> WorkflowSettings {
        self.config.workflow_settings()
    }
}

/// Path to `~/.escp/config.json`.
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".escp").join("config.json"))
}

/// Load configuration: the config file if present, defaults otherwise, then
/// environment overrides.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    let mut config = if path.exists() {
        let content =
            fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?
    } else {
        log::debug!("No config at {}, using defaults", path.display());
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), String> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(backend) = get("ESCP_BACKEND") {
        config.backend = backend.parse()?;
    }
    if let Some(path) = get("ESCP_DB_PATH") {
        config.database_path = Some(path);
    }
    if let Some(url) = get("SUPABASE_URL") {
        config.supabase_url = Some(url);
    }
    if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
        config.service_role_key = Some(key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("ESCP_BACKEND", "supabase"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "k"),
            ("ESCP_DB_PATH", ""),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).cloned()).expect("apply");

        assert_eq!(config.backend, BackendKind::Supabase);
        assert_eq!(config.supabase_url.as_deref(), Some("https://x.supabase.co"));
        assert_eq!(config.service_role_key.as_deref(), Some("k"));
        assert_eq!(config.database_path, None);
    }

    #[test]
    fn test_bad_backend_is_rejected() {
        let vars = env(&[("ESCP_BACKEND", "oracle")]);
        let mut config = Config::default();
        assert!(apply_env_overrides(&mut config, |k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_local_state_opens_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            database_path: Some(dir.path().join("portal.db").to_string_lossy().into_owned()),
            ..Config::default()
        };
        let state = AppState::new(config).expect("state");
        assert_eq!(state.settings().default_role, "viewer");
    }

    #[test]
    fn test_hosted_state_needs_credentials() {
        let config = Config {
            backend: BackendKind::Supabase,
            ..Config::default()
        };
        let err = AppState::new(config).err().expect("missing url");
        assert!(err.requires_user_action());
    }
}
