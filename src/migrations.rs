//! Embedded schema migrations for the local database.
//!
//! Each numbered SQL file is compiled in with `include_str!` and applied once,
//! inside its own transaction, with the applied version recorded in
//! `schema_version`.

use rusqlite::Connection;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "auth_identities",
        sql: include_str!("migrations/002_auth_identities.sql"),
    },
];

fn latest_known() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Highest recorded version; creates the bookkeeping table on first use.
fn schema_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))?;

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Cannot read schema_version: {}", e))
}

/// Hot copy of a populated file database to `<path>.v<version>.bak`.
fn snapshot(conn: &Connection, version: i32) -> Result<(), String> {
    let path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Cannot resolve database path: {}", e))?;
    if path.is_empty() {
        return Ok(());
    }

    let target = format!("{}.v{}.bak", path, version);
    let mut dest = Connection::open(&target).map_err(|e| format!("Cannot open {}: {}", target, e))?;
    rusqlite::backup::Backup::new(conn, &mut dest)
        .and_then(|backup| backup.step(-1).map(|_| ()))
        .map_err(|e| format!("Snapshot before upgrade failed: {}", e))?;

    log::info!("Snapshot of schema v{} written to {}", version, target);
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), String> {
    let fail = |e: rusqlite::Error| {
        format!(
            "Migration {:03}_{} failed: {}",
            migration.version, migration.name, e
        )
    };
    let tx = conn.unchecked_transaction().map_err(fail)?;
    tx.execute_batch(migration.sql).map_err(fail)?;
    tx.execute(
        "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.name],
    )
    .map_err(fail)?;
    tx.commit().map_err(fail)
}

/// Bring the schema up to date and return how many migrations ran.
///
/// A database stamped with a version this build does not know is refused
/// rather than touched.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let current = schema_version(conn)?;
    let latest = latest_known();
    if current > latest {
        return Err(format!(
            "Database is at schema v{} but this escp-portal build only knows v{}; upgrade escp-portal",
            current, latest
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }
    if current > 0 {
        snapshot(conn, current)?;
    }

    for migration in &pending {
        apply(conn, migration)?;
        log::info!(
            "Applied migration {:03}_{}",
            migration.version,
            migration.name
        );
    }
    Ok(pending.len())
}
