//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use cloudfleet_core::{LifecycleState, ResourceId};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::codec;
use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{self, all_column_families};
use crate::types::{Resource, ResourceFilter};
use crate::{check_write, Mutation, Store};

/// RocksDB-backed storage implementation.
///
/// Reads go straight to the database. Writes are serialized by an in-process
/// mutex so each read-modify-write is a compare-and-set, and every record is
/// written together with its state index in a single `WriteBatch`.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn read<R: Resource>(&self, id: &ResourceId) -> Result<Option<R>> {
        let cf = self.cf(schema::records(R::kind()))?;
        self.db
            .get_cf(&cf, keys::resource_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| codec::decode(&data))
            .transpose()
    }

    /// Write a record and move its state index entry from `old_state`.
    fn write<R: Resource>(&self, record: &R, old_state: Option<R::State>) -> Result<()> {
        let kind = R::kind();
        let cf_records = self.cf(schema::records(kind))?;
        let cf_by_state = self.cf(schema::state_index(kind))?;

        let id = record.id();
        let state = record.state();
        let value = codec::encode(record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_records, keys::resource_key(&id), &value);
        if let Some(old) = old_state {
            if old != state {
                batch.delete_cf(&cf_by_state, keys::state_index_key(old.name(), &id));
            }
        }
        batch.put_cf(&cf_by_state, keys::state_index_key(state.name(), &id), []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn ids_in_state<R: Resource>(&self, state: R::State) -> Result<Vec<ResourceId>> {
        let cf_by_state = self.cf(schema::state_index(R::kind()))?;
        let prefix = keys::state_prefix(state.name());

        let mut ids = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_state,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(&prefix) {
                break;
            }

            let id = keys::extract_id_from_state_key(&key).ok_or_else(|| {
                StoreError::Database(format!("malformed {} state index key", R::kind()))
            })?;
            ids.push(id);
        }

        Ok(ids)
    }
}

impl Store for RocksStore {
    fn insert<R: Resource>(&self, record: &R) -> Result<()> {
        let _guard = self.write_lock.lock();
        let id = record.id();
        if self.read::<R>(&id)?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: R::kind(),
                id,
            });
        }
        self.write(record, None)
    }

    fn get<R: Resource>(&self, id: ResourceId) -> Result<Option<R>> {
        self.read(&id)
    }

    fn list<R: Resource>(&self, filter: &ResourceFilter<R::State>) -> Result<Vec<R>> {
        let mut records = Vec::new();

        if filter.states.is_empty() {
            let cf = self.cf(schema::records(R::kind()))?;
            for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
                let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                let record: R = codec::decode(&value)?;
                if filter.matches(record.state(), record.meta().is_deleted()) {
                    records.push(record);
                }
            }
            return Ok(records);
        }

        let mut states = filter.states.clone();
        states.sort_unstable();
        states.dedup();
        for state in states {
            for id in self.ids_in_state::<R>(state)? {
                if let Some(record) = self.read::<R>(&id)? {
                    if filter.matches(record.state(), record.meta().is_deleted()) {
                        records.push(record);
                    }
                }
            }
        }
        Ok(records)
    }

    fn modify<R, T, F>(&self, id: ResourceId, f: F) -> Result<T>
    where
        R: Resource,
        F: FnOnce(&mut R) -> Result<Mutation<T>>,
    {
        let _guard = self.write_lock.lock();
        let before = self.read::<R>(&id)?.ok_or(StoreError::NotFound {
            kind: R::kind(),
            id,
        })?;

        let mut record = before.clone();
        match f(&mut record)? {
            Mutation::Keep(value) => Ok(value),
            Mutation::Write(value) => {
                check_write(&before, &record)?;
                self.write(&record, Some(before.state()))?;
                Ok(value)
            }
        }
    }
}
