//! State store tables and their versioned upgrades.

use rusqlite::Connection;

use super::error::StateError;

/// Upgrade steps in order; step `n` takes the store from version `n` to `n + 1`.
///
/// Values in `kv` are JSON documents. The offline queue gets its own table
/// because it needs insertion order and per-row attempt counters.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE offline_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);
"#];

pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub(crate) fn schema_version(conn: &Connection) -> Result<i32, StateError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the store up to [`SCHEMA_VERSION`].
///
/// Each step commits together with its `user_version` bump, so an
/// interrupted upgrade resumes at the failed step.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    for (step, ddl) in MIGRATIONS.iter().enumerate().skip(found.max(0) as usize) {
        let target = step as i32 + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(ddl)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        tracing::debug!(version = target, "Applied state store migration");
    }
    Ok(())
}
