//! Schema versioning for the durable client store.
//!
//! Applied versions are recorded in `_migrations`; each pending migration
//! runs in its own transaction together with its bookkeeping row, so a
//! failed batch leaves the store at the previous version.

use super::Error;
use tokio_rusqlite::{Connection, params, rusqlite};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; every batch uses `IF NOT EXISTS`.
const MIGRATIONS: &[Migration] =
    &[Migration { version: 1, name: "cache_entries", sql: include_str!("../../migrations/001_cache_entries.sql") }];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Highest applied version, 0 for a fresh store.
fn current_version(conn: &rusqlite::Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
}

fn apply_pending(conn: &mut rusqlite::Connection, migrations: &[Migration]) -> Result<usize, Error> {
    conn.execute(BOOKKEEPING, [])?;
    let current = current_version(conn)?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name)))?;
        tx.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::debug!(version = migration.version, name = migration.name, "applied cache migration");
        applied += 1;
    }
    Ok(applied)
}

/// Bring the store up to the latest schema. Returns how many migrations ran.
pub async fn run(conn: &Connection) -> Result<usize, Error> {
    conn.call(|conn| apply_pending(conn, MIGRATIONS)).await.map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().await.unwrap();
        assert_eq!(run(&conn).await.unwrap(), MIGRATIONS.len());
        assert_eq!(run(&conn).await.unwrap(), 0);

        let has_entries: bool = conn
            .call(|conn| {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='cache_entries')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert!(has_entries);
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        let migrations = [
            Migration { version: 1, name: "ok", sql: "CREATE TABLE a (x INTEGER);" },
            Migration { version: 2, name: "broken", sql: "CREATE TABLE b (y INTEGER); SELECT * FROM missing;" },
        ];

        let err = apply_pending(&mut conn, &migrations).unwrap_err();
        assert!(err.to_string().contains("2 (broken)"));
        assert_eq!(current_version(&conn).unwrap(), 1);

        let has_b: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name='b')", [], |row| row.get(0))
            .unwrap();
        assert!(!has_b);
    }
}
