//! `vms` and `name_sequence` tables.

use chrono::SecondsFormat;
use rusqlite::{OptionalExtension, params};

use orchard_shared::{OrchardError, OrchardResult};

use super::{Database, db_err};
use crate::runtime::VmRecord;

/// Row-level access to persisted VM records.
#[derive(Debug, Clone)]
pub struct VmTable {
    db: Database,
}

impl VmTable {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a record.
    pub fn upsert(&self, vm: &VmRecord) -> OrchardResult<()> {
        let json = serde_json::to_string(vm)
            .map_err(|e| OrchardError::Internal(format!("serialize vm {}: {}", vm.name, e)))?;
        let created_at = vm.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);

        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO vms (name, status, pid, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                status = excluded.status,
                pid = excluded.pid,
                created_at = excluded.created_at,
                record_json = excluded.record_json",
            params![vm.name, vm.status.as_str(), vm.pid, created_at, json],
        ))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> OrchardResult<Option<VmRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT record_json FROM vms WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
        )?;
        json.map(|json| parse_record(name, &json)).transpose()
    }

    /// Returns whether a row was removed.
    pub fn remove(&self, name: &str) -> OrchardResult<bool> {
        let conn = self.db.conn();
        let removed = db_err!(conn.execute("DELETE FROM vms WHERE name = ?1", params![name]))?;
        Ok(removed > 0)
    }

    /// All records, oldest first.
    pub fn list(&self) -> OrchardResult<Vec<VmRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT name, record_json FROM vms ORDER BY created_at ASC, name ASC"
        ))?;
        let rows = db_err!(stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        }))?;

        let mut vms = Vec::new();
        for row in rows {
            let (name, json) = db_err!(row)?;
            match parse_record(&name, &json) {
                Ok(vm) => vms.push(vm),
                Err(e) => tracing::warn!(vm = %name, error = %e, "Skipping unreadable vm record"),
            }
        }
        Ok(vms)
    }

    /// Take the next value of the name sequence.
    ///
    /// Runs in an immediate transaction so concurrent controllers never share a value.
    pub fn next_sequence(&self) -> OrchardResult<u64> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction_with_behavior(
            rusqlite::TransactionBehavior::Immediate
        ))?;
        let next: i64 = db_err!(tx.query_row(
            "SELECT next FROM name_sequence WHERE id = 1",
            [],
            |row| row.get(0),
        ))?;
        db_err!(tx.execute(
            "UPDATE name_sequence SET next = ?1 WHERE id = 1",
            params![next + 1],
        ))?;
        db_err!(tx.commit())?;

        u64::try_from(next)
            .map_err(|_| OrchardError::Database(format!("corrupt name sequence: {}", next)))
    }
}

fn parse_record(name: &str, json: &str) -> OrchardResult<VmRecord> {
    serde_json::from_str(json)
        .map_err(|e| OrchardError::Database(format!("corrupt record for {}: {}", name, e)))
}
