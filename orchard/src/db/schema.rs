//! Table definitions.

pub(super) const SCHEMA_VERSION: i32 = 1;

/// Applied to every connection: WAL, fsync per commit, 10s busy wait.
pub(super) const CONNECTION_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=FULL;
PRAGMA busy_timeout=10000;
";

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const VMS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS vms (
    name TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    pid INTEGER,
    created_at TEXT NOT NULL,
    record_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vms_created_at ON vms(created_at);
";

const NAME_SEQUENCE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS name_sequence (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    next INTEGER NOT NULL
);
INSERT OR IGNORE INTO name_sequence (id, next) VALUES (1, 1);
";

pub(super) fn all_schemas() -> [&'static str; 3] {
    [SCHEMA_VERSION_TABLE, VMS_TABLE, NAME_SEQUENCE_TABLE]
}
