use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use weft_core::error::{Result, WeftError};
use weft_core::traits::VersionStore;
use weft_core::workflow::{VersionStatus, WorkflowVersion};

use super::lock;

/// Durable version store backed by SQLite.
///
/// Each version is stored as a JSON document next to the columns used for
/// lookups. Activation runs in a single immediate transaction, so
/// concurrent activations are serialized even across connections to the
/// same file.
pub struct SqliteVersionStore {
    conn: Mutex<Connection>,
}

impl SqliteVersionStore {
    /// Open or create the version database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn =
            Connection::open(path).map_err(|e| WeftError::storage("open version store", e))?;
        Self::init(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WeftError::storage("open version store", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| WeftError::storage("set busy timeout", e))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS workflow_versions (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 id TEXT NOT NULL UNIQUE,
                 workflow_id TEXT NOT NULL,
                 status TEXT NOT NULL,
                 body TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_versions_workflow
                 ON workflow_versions(workflow_id, seq);",
        )
        .map_err(|e| WeftError::storage("initialize version schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn decode(body: &str, status: &str) -> Result<WorkflowVersion> {
    let mut version: WorkflowVersion = serde_json::from_str(body)?;
    // The status column is authoritative; activation only rewrites it.
    version.status = status.parse().map_err(WeftError::Database)?;
    Ok(version)
}

impl VersionStore for SqliteVersionStore {
    fn insert(&self, version: WorkflowVersion) -> Result<()> {
        let conn = lock(&self.conn, "version store")?;
        let body = serde_json::to_string(&version)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO workflow_versions (id, workflow_id, status, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    version.id,
                    version.workflow_id,
                    version.status.to_string(),
                    body,
                    version.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| WeftError::storage("insert version", e))?;
        if inserted == 0 {
            return Err(WeftError::Conflict(format!(
                "version '{}' already exists",
                version.id
            )));
        }
        Ok(())
    }

    fn replace(&self, version: WorkflowVersion) -> Result<()> {
        let conn = lock(&self.conn, "version store")?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM workflow_versions WHERE id = ?1",
                params![version.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| WeftError::storage("load version", e))?;
        match status.as_deref() {
            None => return Err(WeftError::not_found("version", &version.id)),
            Some("draft") => {}
            Some(other) => {
                return Err(WeftError::Conflict(format!(
                    "version '{}' is {} and can no longer be modified",
                    version.id, other
                )))
            }
        }
        let body = serde_json::to_string(&version)?;
        conn.execute(
            "UPDATE workflow_versions SET body = ?2, status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'draft'",
            params![
                version.id,
                body,
                version.status.to_string(),
                version.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WeftError::storage("update version", e))?;
        Ok(())
    }

    fn activate(&self, workflow_id: &str, version_id: &str) -> Result<()> {
        let mut conn = lock(&self.conn, "version store")?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| WeftError::storage("begin activation", e))?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT seq FROM workflow_versions WHERE id = ?1 AND workflow_id = ?2",
                params![version_id, workflow_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| WeftError::storage("load version", e))?;
        if exists.is_none() {
            return Err(WeftError::not_found(
                "version",
                format!("{}/{}", workflow_id, version_id),
            ));
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE workflow_versions SET status = ?3, updated_at = ?4
             WHERE workflow_id = ?1 AND id != ?2 AND status != ?3",
            params![workflow_id, version_id, VersionStatus::Deprecated.to_string(), now],
        )
        .map_err(|e| WeftError::storage("deprecate versions", e))?;
        tx.execute(
            "UPDATE workflow_versions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![version_id, VersionStatus::Active.to_string(), now],
        )
        .map_err(|e| WeftError::storage("activate version", e))?;

        tx.commit()
            .map_err(|e| WeftError::storage("commit activation", e))
    }

    fn get(&self, version_id: &str) -> Result<WorkflowVersion> {
        let conn = lock(&self.conn, "version store")?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT body, status FROM workflow_versions WHERE id = ?1",
                params![version_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| WeftError::storage("load version", e))?;
        match row {
            Some((body, status)) => decode(&body, &status),
            None => Err(WeftError::not_found("version", version_id)),
        }
    }

    fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowVersion>> {
        let conn = lock(&self.conn, "version store")?;
        let mut stmt = conn
            .prepare(
                "SELECT body, status FROM workflow_versions
                 WHERE ?1 IS NULL OR workflow_id = ?1
                 ORDER BY seq",
            )
            .map_err(|e| WeftError::storage("prepare version query", e))?;
        let rows = stmt
            .query_map(params![workflow_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| WeftError::storage("list versions", e))?;

        let mut versions = Vec::new();
        for row in rows {
            let (body, status) = row.map_err(|e| WeftError::storage("read version row", e))?;
            versions.push(decode(&body, &status)?);
        }
        Ok(versions)
    }

    fn delete(&self, version_id: &str) -> Result<()> {
        let conn = lock(&self.conn, "version store")?;
        let deleted = conn
            .execute(
                "DELETE FROM workflow_versions WHERE id = ?1",
                params![version_id],
            )
            .map_err(|e| WeftError::storage("delete version", e))?;
        if deleted == 0 {
            return Err(WeftError::not_found("version", version_id));
        }
        Ok(())
    }
}
