//! Database layer for orchard.
//!
//! SQLite persistence for VM records. Each row keeps queryable columns
//! (`status`, `pid`, `created_at`) next to a JSON blob of the full record.
//! The controller and the shim open the same file from different processes,
//! so the connection runs in WAL mode with a generous busy timeout.

mod schema;
mod vms;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use orchard_shared::{OrchardError, OrchardResult};

pub use vms::VmTable;

/// Helper macro to convert rusqlite errors to OrchardError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| OrchardError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> OrchardResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // Each CLI invocation and each shim holds its own connection to this file.
        // A shim loads its record while `start` may be saving another one, so writers
        // wait out the busy timeout instead of failing with SQLITE_BUSY.
        db_err!(conn.execute_batch(schema::CONNECTION_PRAGMAS))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn init_schema(conn: &Connection) -> OrchardResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT OR IGNORE INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(OrchardError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade orchard.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("db").join("test.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_db_reopen_keeps_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        drop(Database::open(&db_path).unwrap());

        let db = Database::open(&db_path).unwrap();
        let version: i32 = db
            .conn()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_db_second_connection_sees_committed_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let controller = Database::open(&db_path).unwrap();
        let shim = Database::open(&db_path).unwrap();

        let mode: String = shim
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        controller
            .conn()
            .execute("UPDATE name_sequence SET next = 7 WHERE id = 1", [])
            .unwrap();
        let next: i64 = shim
            .conn()
            .query_row("SELECT next FROM name_sequence WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(next, 7);
    }

    #[test]
    fn test_db_rejects_newer_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        {
            let db = Database::open(&db_path).unwrap();
            db.conn()
                .execute("UPDATE schema_version SET version = 999 WHERE id = 1", [])
                .unwrap();
        }

        let err = Database::open(&db_path).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }
}
