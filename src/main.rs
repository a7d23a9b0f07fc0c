//! `escp-portal`: run one portal request against the configured backend.
//!
//! Usage:
//!   escp-portal [REQUEST.json | -]   read a request from a file or stdin
//!   escp-portal --init-db            create or upgrade the local database
//!
//! Configuration comes from `~/.escp/config.json` plus `ESCP_*` / `SUPABASE_*`
//! environment overrides. Logging follows `RUST_LOG` (default `info`), on stderr.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;

use escp_portal_lib::commands::dispatch;
use escp_portal_lib::state::{load_config, AppState};
use escp_portal_lib::store::sqlite::SqliteBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load portal config: {e}"))?;
    let arg = std::env::args().nth(1);

    if arg.as_deref() == Some("--init-db") {
        let path = config.database_path.as_ref().map(PathBuf::from);
        SqliteBackend::open(path).context("Failed to initialise local database")?;
        log::info!("Local database is up to date");
        return Ok(());
    }

    let request = match arg.as_deref() {
        Some(path) if path != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {path}"))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };

    let state = AppState::new(config)
        .map_err(|e| anyhow::anyhow!("{e}. {}", e.recovery_suggestion()))?;
    let response = dispatch(&state, &request).await;

    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
