//! Flat CSV record store
//!
//! The whole storage scope lives in one file of `path,checksum,scanned_at`
//! rows. It is parsed once when the store is opened; lookups and upserts
//! work on that in-memory copy and `commit` replaces the file atomically
//! (write to a temporary file in the same directory, then rename). Path
//! fields hold the raw bytes of the path, so the file is not necessarily
//! valid UTF-8.

use super::{format_timestamp, parse_timestamp, path_bytes, path_from_bytes, FileRecord, RecordStore, Snapshot};
use crate::error::{Error, Result};
use csv::ByteRecord;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const HEADER: [&str; 3] = ["path", "checksum", "scanned_at"];

pub struct CsvStore {
    path: PathBuf,
    records: Snapshot,
}

impl CsvStore {
    /// Load an existing CSV baseline, or prepare to create a new one.
    pub fn open(path: &Path) -> Result<Self> {
        let target = path.display().to_string();

        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| {
            Error::storage(&target, format!("failed to create {}: {}", parent.display(), e))
        })?;
        // The rewrite goes through a temp file next to the target, so make
        // sure one can be created before any scanning starts
        NamedTempFile::new_in(&parent)
            .map_err(|e| Error::storage(&target, format!("directory is not writable: {}", e)))?;

        let records = if path.exists() {
            let file = File::open(path)
                .map_err(|e| Error::storage(&target, format!("failed to open: {}", e)))?;
            read_records(file, &target)?
        } else {
            tracing::info!("CSV file {} doesn't exist yet, it will be created", target);
            Snapshot::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, file: &mut NamedTempFile) -> Result<()> {
        let mut writer = csv::Writer::from_writer(file.as_file_mut());
        writer.write_record(HEADER)?;
        for record in self.records.values() {
            writer.write_record([
                path_bytes(&record.path),
                record.checksum.clone().into_bytes(),
                format_timestamp(&record.scanned_at).into_bytes(),
            ])?;
        }
        writer.flush().map_err(|e| self.storage_error(e))?;
        Ok(())
    }

    fn storage_error(&self, err: impl ToString) -> Error {
        Error::storage(self.path.display().to_string(), err)
    }
}

/// Parse CSV rows into a snapshot. A header row is optional.
fn read_records<R: std::io::Read>(reader: R, target: &str) -> Result<Snapshot> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Snapshot::new();
    for (index, row) in reader.byte_records().enumerate() {
        let row = row.map_err(|e| Error::storage(target, format!("unreadable row {}: {}", index + 1, e)))?;
        let line = row.position().map(|p| p.line()).unwrap_or(index as u64 + 1);

        if index == 0 && row.iter().eq(HEADER.iter().map(|h| h.as_bytes())) {
            continue;
        }
        if row.len() != HEADER.len() {
            return Err(Error::storage(
                target,
                format!("line {}: expected {} fields, found {}", line, HEADER.len(), row.len()),
            ));
        }

        let checksum = text_field(&row, 1, line, target)?;
        let scanned_at = text_field(&row, 2, line, target)?;
        let scanned_at = parse_timestamp(scanned_at)
            .map_err(|e| Error::storage(target, format!("line {}: bad timestamp '{}': {}", line, scanned_at, e)))?;

        let record = FileRecord::new(path_from_bytes(row[0].to_vec()), checksum, scanned_at);
        records.insert(record.path.clone(), record);
    }
    Ok(records)
}

fn text_field<'r>(row: &'r ByteRecord, index: usize, line: u64, target: &str) -> Result<&'r str> {
    std::str::from_utf8(&row[index])
        .map(str::trim)
        .map_err(|_| Error::storage(target, format!("line {}: field {} is not UTF-8", line, index + 1)))
}

impl RecordStore for CsvStore {
    fn load(&self, path: &Path) -> Result<Option<FileRecord>> {
        Ok(self.records.get(path).cloned())
    }

    fn upsert(&mut self, record: FileRecord) -> Result<()> {
        self.records.insert(record.path.clone(), record);
        Ok(())
    }

    fn load_all(&self) -> Result<Snapshot> {
        Ok(self.records.clone())
    }

    fn commit(&mut self) -> Result<()> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&parent).map_err(|e| self.storage_error(e))?;

        self.write_to(&mut temp)?;
        temp.as_file_mut()
            .flush()
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| self.storage_error(e))?;

        temp.persist(&self.path)
            .map_err(|e| self.storage_error(format!("failed to replace file: {}", e.error)))?;
        tracing::debug!("Wrote {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("CSV file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{self, record};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = CsvStore::open(&temp_dir.path().join("results.csv")).unwrap();
        contract::upsert_replaces(&mut store);
    }

    #[test]
    fn test_round_trip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("nested/results.csv");

        let written = vec![
            record("/data/a.txt", "aaaa", 1_700_000_000),
            record("/data/with,comma.txt", "bbbb", 1_700_000_050),
            record("/data/sub/c.txt", "cccc", 1_700_000_100),
        ];
        let mut store = CsvStore::open(&csv_path).unwrap();
        for r in &written {
            store.upsert(r.clone()).unwrap();
        }
        store.commit().unwrap();

        let reopened = CsvStore::open(&csv_path).unwrap();
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), written.len());
        for r in &written {
            assert_eq!(all.get(&r.path), Some(r));
        }
    }

    #[test]
    fn test_rewrite_replaces_file() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");

        let mut store = CsvStore::open(&csv_path).unwrap();
        store.upsert(record("/data/a.txt", "aaaa", 1_700_000_000)).unwrap();
        store.commit().unwrap();
        store.upsert(record("/data/a.txt", "bbbb", 1_700_000_100)).unwrap();
        store.commit().unwrap();

        let text = fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "path,checksum,scanned_at");
        assert!(lines[1].starts_with("/data/a.txt,bbbb,"));
    }

    #[test]
    fn test_reads_without_header() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");
        fs::write(
            &csv_path,
            "/data/a.txt,aaaa,2023-11-14T22:13:20Z\n/data/b.txt,bbbb,2023-11-14T22:13:21.5+00:00\n",
        )
        .unwrap();

        let store = CsvStore::open(&csv_path).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.load(Path::new("/data/b.txt")).unwrap().unwrap().checksum, "bbbb");
    }

    #[test]
    fn test_uncommitted_changes_leave_file_alone() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");

        let mut store = CsvStore::open(&csv_path).unwrap();
        store.upsert(record("/data/a.txt", "aaaa", 1_700_000_000)).unwrap();
        drop(store);
        assert!(!csv_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");
        let path = contract::non_utf8_path();

        let mut store = CsvStore::open(&csv_path).unwrap();
        let mut written = record("/unused", "aaaa", 1_700_000_000);
        written.path = path.clone();
        store.upsert(written.clone()).unwrap();
        store.commit().unwrap();

        let reopened = CsvStore::open(&csv_path).unwrap();
        assert_eq!(reopened.load(&path).unwrap(), Some(written));
        assert_eq!(reopened.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_row_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");
        fs::write(&csv_path, "path,checksum,scanned_at\n/data/a.txt,aaaa\n").unwrap();

        let err = CsvStore::open(&csv_path).err().unwrap();
        match err {
            Error::Storage { message, .. } => assert!(message.contains("line 2"), "{}", message),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bad_timestamp_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("results.csv");
        fs::write(&csv_path, "/data/a.txt,aaaa,yesterday\n").unwrap();

        assert!(matches!(CsvStore::open(&csv_path), Err(Error::Storage { .. })));
    }
}
