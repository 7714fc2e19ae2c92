//! SQLite record store

use super::{format_timestamp, parse_timestamp, path_bytes, path_from_bytes, FileRecord, RecordStore, Snapshot};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i32 = 2;

/// Baseline stored in a single `files` table, one row per path.
///
/// Paths are kept as BLOBs holding the exact bytes of the file name.
pub struct SqliteStore {
    db: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database, creating the schema if it is absent.
    pub fn open(path: &Path) -> Result<Self> {
        let target = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::storage(&target, format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let db = Connection::open(path)
            .map_err(|e| Error::storage(&target, format!("failed to open database: {}", e)))?;
        db.busy_timeout(Duration::from_secs(30))
            .map_err(|e| Error::storage(&target, e))?;

        let mut store = Self {
            db,
            path: path.to_path_buf(),
        };
        store
            .init_schema()
            .map_err(|e| Error::storage(&target, format!("failed to initialize schema: {}", e)))?;
        Ok(store)
    }

    fn init_schema(&mut self) -> rusqlite::Result<()> {
        let version: i32 = self
            .db
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < SCHEMA_VERSION {
            self.migrate_schema(version)?;
        }
        Ok(())
    }

    fn migrate_schema(&mut self, from_version: i32) -> rusqlite::Result<()> {
        let tx = self.db.transaction()?;

        if from_version == 0 {
            tx.execute(
                "CREATE TABLE IF NOT EXISTS files (
                    path BLOB PRIMARY KEY,
                    checksum TEXT NOT NULL,
                    scanned_at TEXT NOT NULL
                )",
                [],
            )?;
        }

        if from_version == 1 {
            // Version 1 stored paths as text
            tx.execute("UPDATE files SET path = CAST(path AS BLOB)", [])?;
        }

        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()
    }

    fn storage_error(&self, err: impl ToString) -> Error {
        Error::storage(self.path.display().to_string(), err)
    }

    fn to_record(&self, path: Vec<u8>, checksum: String, scanned_at: String) -> Result<FileRecord> {
        let path = path_from_bytes(path);
        let scanned_at = parse_timestamp(&scanned_at).map_err(|e| {
            self.storage_error(format!("bad timestamp '{}' for {}: {}", scanned_at, path.display(), e))
        })?;
        Ok(FileRecord::new(path, checksum, scanned_at))
    }
}

impl RecordStore for SqliteStore {
    fn load(&self, path: &Path) -> Result<Option<FileRecord>> {
        let row: Option<(Vec<u8>, String, String)> = self
            .db
            .query_row(
                "SELECT path, checksum, scanned_at FROM files WHERE path = ?1",
                [path_bytes(path)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| self.storage_error(e))?;

        row.map(|(path, checksum, scanned_at)| self.to_record(path, checksum, scanned_at))
            .transpose()
    }

    fn upsert(&mut self, record: FileRecord) -> Result<()> {
        // All upserts of a run share one transaction, finished by commit()
        if self.db.is_autocommit() {
            self.db
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| self.storage_error(e))?;
        }

        self.db
            .execute(
                "INSERT INTO files (path, checksum, scanned_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET
                    checksum = excluded.checksum,
                    scanned_at = excluded.scanned_at",
                params![
                    path_bytes(&record.path),
                    record.checksum,
                    format_timestamp(&record.scanned_at)
                ],
            )
            .map_err(|e| self.storage_error(format!("failed to upsert {}: {}", record.path.display(), e)))?;
        Ok(())
    }

    fn load_all(&self) -> Result<Snapshot> {
        let mut stmt = self
            .db
            .prepare("SELECT path, checksum, scanned_at FROM files ORDER BY path")
            .map_err(|e| self.storage_error(e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| self.storage_error(e))?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let (path, checksum, scanned_at) = row.map_err(|e| self.storage_error(e))?;
            let record = self.to_record(path, checksum, scanned_at)?;
            snapshot.insert(record.path.clone(), record);
        }
        Ok(snapshot)
    }

    fn commit(&mut self) -> Result<()> {
        if !self.db.is_autocommit() {
            self.db
                .execute_batch("COMMIT")
                .map_err(|e| self.storage_error(format!("failed to commit: {}", e)))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("database {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{self, record};
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("nested/checkr.sqlite")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_open_creates_schema() {
        let (_temp_dir, store) = setup_test_store();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkr.sqlite");

        let mut store = SqliteStore::open(&db_path).unwrap();
        store.upsert(record("/data/a.txt", "aaaa", 1_700_000_000)).unwrap();
        store.commit().unwrap();
        drop(store);

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_replaces() {
        let (_temp_dir, mut store) = setup_test_store();
        contract::upsert_replaces(&mut store);
    }

    #[test]
    fn test_uncommitted_run_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkr.sqlite");

        let mut store = SqliteStore::open(&db_path).unwrap();
        store.upsert(record("/data/a.txt", "aaaa", 1_700_000_000)).unwrap();
        store.commit().unwrap();
        store.upsert(record("/data/a.txt", "bbbb", 1_700_000_100)).unwrap();
        drop(store);

        let store = SqliteStore::open(&db_path).unwrap();
        let a = store.load(Path::new("/data/a.txt")).unwrap().unwrap();
        assert_eq!(a.checksum, "aaaa");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkr.sqlite");
        let path = contract::non_utf8_path();

        let mut store = SqliteStore::open(&db_path).unwrap();
        let mut written = record("/unused", "aaaa", 1_700_000_000);
        written.path = path.clone();
        store.upsert(written.clone()).unwrap();
        store.commit().unwrap();
        drop(store);

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.load(&path).unwrap(), Some(written.clone()));
        assert_eq!(store.load_all().unwrap().into_values().collect::<Vec<_>>(), vec![written]);
    }

    #[test]
    fn test_text_paths_from_version_1_are_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkr.sqlite");
        {
            let db = Connection::open(&db_path).unwrap();
            db.execute_batch(
                "CREATE TABLE files (path TEXT PRIMARY KEY, checksum TEXT NOT NULL, scanned_at TEXT NOT NULL);
                 INSERT INTO files VALUES ('/data/a.txt', 'aaaa', '2023-11-14T22:13:20Z');
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        let a = store.load(Path::new("/data/a.txt")).unwrap().unwrap();
        assert_eq!(a.checksum, "aaaa");
    }

    #[test]
    fn test_corrupt_database_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkr.sqlite");
        std::fs::write(&db_path, vec![b'x'; 4096]).unwrap();

        let err = SqliteStore::open(&db_path).err().unwrap();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
