//! Persistence of installation records across restarts.
//!
//! # Invariants
//! - A record that cannot be read back is reported as absent, never as an
//!   error, so the caller reinstalls.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::deploy::installer::Installation;
use log::warn;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode installation record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Stores the last installation of each application name.
pub trait DeploymentRecorder: Send + Sync {
    /// Records `installation` under `name`; `None` clears the record.
    fn record_installation(
        &self,
        name: &str,
        installation: Option<&Installation>,
    ) -> Result<(), RecorderError>;

    fn fetch_installation(&self, name: &str) -> Option<Installation>;
}

#[derive(Debug, Default)]
pub struct MemoryDeploymentRecorder {
    records: Mutex<HashMap<String, Installation>>,
}

impl MemoryDeploymentRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeploymentRecorder for MemoryDeploymentRecorder {
    fn record_installation(
        &self,
        name: &str,
        installation: Option<&Installation>,
    ) -> Result<(), RecorderError> {
        let mut records = self.records.lock();
        match installation {
            Some(installation) => {
                records.insert(name.to_string(), installation.clone());
            }
            None => {
                records.remove(name);
            }
        }
        Ok(())
    }

    fn fetch_installation(&self, name: &str) -> Option<Installation> {
        self.records.lock().get(name).cloned()
    }
}

/// Recorder backed by the `installations` table.
///
/// Records are stored as JSON documents next to a few indexed columns.
pub struct SqliteDeploymentRecorder {
    conn: Mutex<Connection>,
}

impl SqliteDeploymentRecorder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn in_memory() -> Result<Self, RecorderError> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps a connection that already has migrations applied.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn recorded_names(&self) -> Result<Vec<String>, RecorderError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM installations ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn read_record(&self, name: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .lock()
            .query_row(
                "SELECT record FROM installations WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
    }
}

impl DeploymentRecorder for SqliteDeploymentRecorder {
    fn record_installation(
        &self,
        name: &str,
        installation: Option<&Installation>,
    ) -> Result<(), RecorderError> {
        let conn = self.conn.lock();
        match installation {
            Some(installation) => {
                let record = serde_json::to_string(installation)?;
                conn.execute(
                    "INSERT INTO installations (name, source, directory, record, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(name) DO UPDATE SET
                        source = excluded.source,
                        directory = excluded.directory,
                        record = excluded.record,
                        recorded_at = excluded.recorded_at",
                    params![
                        name,
                        installation.source.to_string_lossy().into_owned(),
                        installation.directory.to_string_lossy().into_owned(),
                        record,
                        installation.timestamp_ms as i64
                    ],
                )?;
            }
            None => {
                conn.execute("DELETE FROM installations WHERE name = ?1", params![name])?;
            }
        }
        Ok(())
    }

    fn fetch_installation(&self, name: &str) -> Option<Installation> {
        let record = match self.read_record(name) {
            Ok(record) => record?,
            Err(err) => {
                warn!(
                    "event=recorder_fetch module=deploy status=error unit={} error_code=read_failed error={}",
                    name, err
                );
                return None;
            }
        };
        match serde_json::from_str(&record) {
            Ok(installation) => Some(installation),
            Err(err) => {
                warn!(
                    "event=recorder_fetch module=deploy status=error unit={} error_code=parse_failed error={}",
                    name, err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeploymentRecorder, MemoryDeploymentRecorder, SqliteDeploymentRecorder};
    use crate::deploy::installer::{FileDigest, Installation};
    use std::path::PathBuf;

    fn installation() -> Installation {
        Installation {
            source: PathBuf::from("/apps/billing"),
            directory: PathBuf::from("/apps/billing"),
            work_directory: PathBuf::from("/work/billing-1"),
            config: None,
            assembly: PathBuf::from("/apps/billing/conf/assembly.toml"),
            environment: Some(PathBuf::from("/apps/billing/conf/environment.toml")),
            resources: vec![PathBuf::from("/apps/billing/lib/a.jar")],
            digests: vec![FileDigest {
                path: PathBuf::from("/apps/billing/lib/a.jar"),
                sha256: "00".repeat(32),
            }],
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn memory_recorder_records_and_clears() {
        let recorder = MemoryDeploymentRecorder::new();
        recorder
            .record_installation("billing", Some(&installation()))
            .expect("record");
        assert_eq!(recorder.fetch_installation("billing"), Some(installation()));
        recorder
            .record_installation("billing", None)
            .expect("clear");
        assert_eq!(recorder.fetch_installation("billing"), None);
    }

    #[test]
    fn sqlite_recorder_overwrites_records() {
        let recorder = SqliteDeploymentRecorder::in_memory().expect("open");
        recorder
            .record_installation("billing", Some(&installation()))
            .expect("record");
        let mut newer = installation();
        newer.timestamp_ms += 1;
        recorder
            .record_installation("billing", Some(&newer))
            .expect("overwrite");
        assert_eq!(recorder.fetch_installation("billing"), Some(newer));
        assert_eq!(
            recorder.recorded_names().expect("names"),
            vec!["billing".to_string()]
        );
    }

    #[test]
    fn unreadable_record_means_no_installation() {
        let recorder = SqliteDeploymentRecorder::in_memory().expect("open");
        recorder
            .conn
            .lock()
            .execute(
                "INSERT INTO installations (name, source, directory, record, recorded_at)
                 VALUES ('billing', '/a', '/a', '{not json', 0)",
                [],
            )
            .expect("insert garbage");
        assert_eq!(recorder.fetch_installation("billing"), None);
        assert_eq!(recorder.fetch_installation("unknown"), None);
    }
}
