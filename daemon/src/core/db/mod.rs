// Transactional key-value layer of the node.
//
// Readers take a `RoTx` backed by a rocksdb snapshot. Writers stage their
// changes in a `RwTx` overlay (a tombstoned map per column) and commit
// everything as one atomic `WriteBatch`; dropping an uncommitted `RwTx`
// rolls it back. Missing keys read as `Ok(None)` and chain walks terminate
// on `None`.

mod column;

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use log::trace;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, SnapshotWithThreadMode, WriteBatch,
};
use strum::IntoEnumIterator;

use crate::core::error::ChainError;

pub use column::Column;

type InnerDb = DBWithThreadMode<MultiThreaded>;

/// Pending change set of a read-write transaction, one ordered map per
/// column. `None` marks a deletion shadowing the on-disk value. `Bytes`
/// keeps the clones taken during range merges refcounted.
type Overlay = HashMap<Column, BTreeMap<Bytes, Option<Bytes>>>;

/// Read surface shared by both transaction kinds.
pub trait KvRead {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError>;

    /// Entries of `column` within `[from, to)` in ascending key order.
    fn range(
        &self,
        column: Column,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError>;
}

pub struct Store {
    db: Arc<InnerDb>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ChainError> {
        let cfs =
            Column::iter().map(|c| ColumnFamilyDescriptor::new(c.to_string(), Options::default()));

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = InnerDb::open_cf_descriptors(&opts, dir, cfs)?;
        Ok(Store { db: Arc::new(db) })
    }

    pub fn ro_tx(&self) -> RoTx<'_> {
        RoTx {
            store: self,
            snapshot: self.db.snapshot(),
        }
    }

    pub fn rw_tx(&self) -> RwTx<'_> {
        RwTx {
            store: self,
            overlay: Overlay::default(),
        }
    }

    fn cf(&self, column: Column) -> Result<Arc<BoundColumnFamily<'_>>, ChainError> {
        self.db
            .cf_handle(column.as_ref())
            .ok_or_else(|| ChainError::Database(format!("column {} not found", column)))
    }

    fn get_raw(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        let cf = self.cf(column)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn range_raw(
        &self,
        column: Column,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
        let cf = self.cf(column)?;
        let mode = match from {
            Some(start) => IteratorMode::From(start, Direction::Forward),
            None => IteratorMode::Start,
        };
        collect_in_bounds(self.db.iterator_cf(&cf, mode), to)
    }
}

fn collect_in_bounds<I>(iter: I, to: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut out = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if let Some(end) = to {
            if key.as_ref() >= end {
                break;
            }
        }
        out.push((key.into_vec(), value.into_vec()));
    }
    Ok(out)
}

/// Consistent read view over the store.
pub struct RoTx<'a> {
    store: &'a Store,
    snapshot: SnapshotWithThreadMode<'a, InnerDb>,
}

impl KvRead for RoTx<'_> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        let cf = self.store.cf(column)?;
        Ok(self.snapshot.get_cf(&cf, key)?)
    }

    fn range(
        &self,
        column: Column,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
        let cf = self.store.cf(column)?;
        let mode = match from {
            Some(start) => IteratorMode::From(start, Direction::Forward),
            None => IteratorMode::Start,
        };
        collect_in_bounds(self.snapshot.iterator_cf(&cf, mode), to)
    }
}

/// Read-write transaction. Reads observe pending writes; `commit` applies
/// the whole overlay atomically.
pub struct RwTx<'a> {
    store: &'a Store,
    overlay: Overlay,
}

impl RwTx<'_> {
    pub fn put(&mut self, column: Column, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.overlay
            .entry(column)
            .or_default()
            .insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Bytes>) {
        self.overlay.entry(column).or_default().insert(key.into(), None);
    }

    pub fn commit(self) -> Result<(), ChainError> {
        let mut batch = WriteBatch::default();
        for (column, changes) in &self.overlay {
            let cf = self.store.cf(*column)?;
            for (key, value) in changes {
                match value {
                    Some(value) => batch.put_cf(&cf, key, value),
                    None => batch.delete_cf(&cf, key),
                }
            }
        }
        trace!("commit batch with {} column overlays", self.overlay.len());
        self.store.db.write(batch)?;
        Ok(())
    }
}

impl KvRead for RwTx<'_> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        if let Some(changes) = self.overlay.get(&column) {
            if let Some(pending) = changes.get(key) {
                return Ok(pending.as_ref().map(|bytes| bytes.to_vec()));
            }
        }
        self.store.get_raw(column, key)
    }

    fn range(
        &self,
        column: Column,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
        let disk = self.store.range_raw(column, from, to)?;
        let Some(changes) = self.overlay.get(&column) else {
            return Ok(disk);
        };

        let mut merged: BTreeMap<Bytes, Bytes> = disk
            .into_iter()
            .map(|(key, value)| (Bytes::from(key), Bytes::from(value)))
            .collect();
        let lower = match from {
            Some(start) => Bound::Included(Bytes::copy_from_slice(start)),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(end) => Bound::Excluded(Bytes::copy_from_slice(end)),
            None => Bound::Unbounded,
        };
        for (key, value) in changes.range((lower, upper)) {
            match value {
                // overlay clones are refcounted, not deep copies
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect())
    }
}
