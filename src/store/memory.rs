//! In-memory record store

use super::{FileRecord, RecordStore, Snapshot};
use crate::error::Result;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Snapshot,
    commits: usize,
    label: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.path.clone(), r)).collect(),
            ..Self::default()
        }
    }

    /// An empty store that describes itself as `label`
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Number of times `commit` has been called
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
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
        self.commits += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("in-memory store ({} records)", self.records.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_upsert_replaces() {
        let mut store = MemoryStore::new();
        contract::upsert_replaces(&mut store);
        assert_eq!(store.commits(), 1);
    }
}
