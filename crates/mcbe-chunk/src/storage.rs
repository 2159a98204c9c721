//! Key-value backends for world data.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use rusty_leveldb::{LdbIterator, DB};

use crate::error::StorageError;

/// Byte-string key-value store holding a world's records.
pub trait KeyValueStore {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, StorageError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    fn flush(&mut self) -> Result<(), StorageError>;

    /// Every record, in key order.
    fn iterate(&mut self) -> Result<Vec<(Vec<u8>, Bytes)>, StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        (**self).get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        (**self).flush()
    }

    fn iterate(&mut self) -> Result<Vec<(Vec<u8>, Bytes)>, StorageError> {
        (**self).iterate()
    }
}

/// A Bedrock `db/` directory.
pub struct LevelDbStore {
    db: DB,
}

impl LevelDbStore {
    /// Open or create a LevelDB database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let opts = rusty_leveldb::Options {
            create_if_missing: true,
            ..rusty_leveldb::Options::default()
        };
        let db = DB::open(path, opts).map_err(|e| StorageError::Open(e.to_string()))?;
        Ok(Self { db })
    }

    /// Flush pending writes and release the database lock.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.flush()
    }
}

impl KeyValueStore for LevelDbStore {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        Ok(self.db.get(key).map(Bytes::from))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::Write(e.to_string()))
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::Write(e.to_string()))
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::Write(e.to_string()))
    }

    fn iterate(&mut self) -> Result<Vec<(Vec<u8>, Bytes)>, StorageError> {
        let mut iter = self
            .db
            .new_iter()
            .map_err(|e| StorageError::Read(e.to_string()))?;
        let mut records = Vec::new();
        while let Some((k, v)) = iter.next() {
            records.push((k.to_vec(), Bytes::from(v)));
        }
        Ok(records)
    }
}

/// In-memory store, for tests and scratch worlds.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<Vec<u8>, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.records
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.records.remove(key);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn iterate(&mut self) -> Result<Vec<(Vec<u8>, Bytes)>, StorageError> {
        Ok(self
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn temp_db_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mcbe_chunk_test_{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn exercise(store: &mut impl KeyValueStore) {
        assert_eq!(store.get(b"a").unwrap(), None);
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"c", b"3").unwrap();
        assert_eq!(store.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));

        store.delete(b"c").unwrap();
        store.flush().unwrap();
        let keys: Vec<_> = store.iterate().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn memory_store_contract() {
        let mut store = MemoryStore::new();
        exercise(&mut store);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn leveldb_store_contract() {
        let path = temp_db_path();
        let mut store = LevelDbStore::open(&path).unwrap();
        exercise(&mut store);
        drop(store);
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn leveldb_reopen_keeps_data() {
        let path = temp_db_path();
        {
            let mut store = LevelDbStore::open(&path).unwrap();
            store.put(b"key", b"value").unwrap();
            store.flush().unwrap();
        }
        let mut store = LevelDbStore::open(&path).unwrap();
        assert_eq!(store.get(b"key").unwrap().as_deref(), Some(&b"value"[..]));
        store.put(b"other", b"2").unwrap();
        store.close().unwrap();

        let mut store = LevelDbStore::open(&path).unwrap();
        assert_eq!(store.get(b"other").unwrap().as_deref(), Some(&b"2"[..]));
        drop(store);
        std::fs::remove_dir_all(&path).ok();
    }
}
