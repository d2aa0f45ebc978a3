//! Persisted block data.
//!
//! A persisted block's column bytes live in an immutable object referenced
//! by `meta_loc`. Deletes that land after the flush accumulate in the
//! resident delete chain and are periodically drained into a delta-delete
//! object (`delta_loc`); a reader merges both at its snapshot.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use strata_batch::{Bitmap, ColumnVector, LogicalType, Schema, Value};
use strata_common::types::{SeqNum, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};
use strata_fs::{FileService, Location, ObjectReader};
use strata_index::{ImmutIndex, SyncLruCache};

use crate::data::deletes::DeleteChain;

/// Cache key for one decoded column extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnCacheKey {
    /// Object name.
    pub object: String,
    /// Block index within the object.
    pub block_idx: u16,
    /// Column position in the block's write-time schema.
    pub pos: u16,
}

/// Shared cache of decoded column extents.
pub type ColumnCache = SyncLruCache<ColumnCacheKey, Arc<ColumnVector>>;

/// One row of a delta-delete object.
#[derive(Debug, Clone)]
pub struct DeltaRow {
    /// Deleted row offset.
    pub row: u32,
    /// Commit timestamp of the deletion.
    pub commit_ts: Timestamp,
}

/// The state of a persisted (non-appendable) block.
#[derive(Debug)]
pub struct PersistedData {
    schema: Arc<Schema>,
    meta_loc: Location,
    delta_loc: Option<Location>,
    immut: ImmutIndex,
    rows: u32,
    sorted: bool,
    /// Deletes newer than the last delta flush.
    pub deletes: DeleteChain,
    delta_cache: Mutex<Option<Arc<Vec<DeltaRow>>>>,
    delta_installed_at: Option<Timestamp>,
    delta_flushed_upto: Option<Timestamp>,
}

impl PersistedData {
    /// Creates persisted data from parts built by a flush or merge task.
    #[must_use]
    pub fn new(
        schema: Arc<Schema>,
        meta_loc: Location,
        immut: ImmutIndex,
        sorted: bool,
    ) -> Self {
        let rows = meta_loc.rows;
        Self {
            schema,
            meta_loc,
            delta_loc: None,
            immut,
            rows,
            sorted,
            deletes: DeleteChain::new(),
            delta_cache: Mutex::new(None),
            delta_installed_at: None,
            delta_flushed_upto: None,
        }
    }

    /// Loads persisted data from an object, rebuilding the immutable index
    /// from the persisted zonemap and bloom sections. Used by replay.
    pub fn load(
        fs: &dyn FileService,
        schema: Arc<Schema>,
        meta_loc: Location,
        sorted: bool,
    ) -> StrataResult<Self> {
        let reader = ObjectReader::open(fs, &meta_loc.object)?;
        let immut = match schema.pk_pos() {
            Some(pk_pos) => {
                let mut zm_bytes = reader.read_zonemap(fs, meta_loc.block_idx, pk_pos)?;
                let zonemap = strata_index::ZoneMap::decode(&mut zm_bytes)?;
                let bloom = match reader.read_bloom(fs, meta_loc.block_idx)? {
                    Some(mut raw) => strata_index::BloomFilter::decode(&mut raw)?,
                    None => strata_index::BloomFilter::new(64, 1),
                };
                ImmutIndex::from_parts(zonemap, bloom)
            }
            None => ImmutIndex::from_parts(
                strata_index::ZoneMap::new(),
                strata_index::BloomFilter::new(64, 1),
            ),
        };
        Ok(Self::new(schema, meta_loc, immut, sorted))
    }

    /// Returns the write-time schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the block's column location.
    #[must_use]
    pub fn meta_loc(&self) -> &Location {
        &self.meta_loc
    }

    /// Returns the persisted-delete location, if any.
    #[must_use]
    pub fn delta_loc(&self) -> Option<&Location> {
        self.delta_loc.as_ref()
    }

    /// Returns the immutable row count.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Returns true if rows are in primary-key order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Returns the probe summary.
    #[must_use]
    pub fn immut_index(&self) -> &ImmutIndex {
        &self.immut
    }

    /// Installs a new delta-delete location and prunes the resident chain
    /// up to `flushed_upto`.
    pub fn install_delta(
        &mut self,
        delta_loc: Location,
        flushed_upto: Timestamp,
        installed_at: Timestamp,
    ) {
        self.delta_loc = Some(delta_loc);
        self.deletes.prune_committed(flushed_upto);
        self.delta_installed_at = Some(installed_at);
        self.delta_flushed_upto = Some(flushed_upto);
        *self.delta_cache.lock() = None;
    }

    /// Commit timestamp of the last delta installation, if any.
    #[must_use]
    pub fn delta_installed_at(&self) -> Option<Timestamp> {
        self.delta_installed_at
    }

    /// Resident deletes at or below this timestamp live in the delta.
    #[must_use]
    pub fn delta_flushed_upto(&self) -> Option<Timestamp> {
        self.delta_flushed_upto
    }

    /// Reads one column by its position in the write-time schema.
    pub fn read_column(
        &self,
        fs: &dyn FileService,
        cache: &ColumnCache,
        pos: usize,
    ) -> StrataResult<Arc<ColumnVector>> {
        let key = ColumnCacheKey {
            object: self.meta_loc.object.clone(),
            block_idx: self.meta_loc.block_idx,
            pos: pos as u16,
        };
        if let Some(col) = cache.get(&key) {
            return Ok(col);
        }
        let reader = ObjectReader::open(fs, &self.meta_loc.object)?;
        let mut raw = reader.read_column(fs, self.meta_loc.block_idx, pos)?;
        let col = Arc::new(ColumnVector::decode(&mut raw)?);
        cache.insert(key, Arc::clone(&col));
        Ok(col)
    }

    /// Reads the column identified by `seq_num`, or a typed all-null
    /// vector when the column did not exist at write time.
    pub fn read_column_by_seqnum(
        &self,
        fs: &dyn FileService,
        cache: &ColumnCache,
        seq_num: SeqNum,
        ty: LogicalType,
    ) -> StrataResult<Arc<ColumnVector>> {
        match self.schema.pos_of_seqnum(seq_num) {
            Some(pos) => self.read_column(fs, cache, pos),
            None => Ok(Arc::new(ColumnVector::all_null(ty, self.rows as usize))),
        }
    }

    /// The decoded delta-delete rows, loaded lazily and cached.
    pub fn delta_rows_snapshot(&self, fs: &dyn FileService) -> StrataResult<Arc<Vec<DeltaRow>>> {
        self.delta_rows(fs)
    }

    fn delta_rows(&self, fs: &dyn FileService) -> StrataResult<Arc<Vec<DeltaRow>>> {
        if let Some(cached) = self.delta_cache.lock().clone() {
            return Ok(cached);
        }
        let Some(delta_loc) = &self.delta_loc else {
            let empty = Arc::new(Vec::new());
            *self.delta_cache.lock() = Some(Arc::clone(&empty));
            return Ok(empty);
        };
        let reader = ObjectReader::open(fs, &delta_loc.object)?;
        let mut rowid_raw = reader.read_column(fs, delta_loc.block_idx, 0)?;
        let rowids = ColumnVector::decode(&mut rowid_raw)?;
        let mut ts_raw = reader.read_column(fs, delta_loc.block_idx, 1)?;
        let commit_tss = ColumnVector::decode(&mut ts_raw)?;
        let mut rows = Vec::with_capacity(rowids.len());
        for i in 0..rowids.len() {
            let row = match rowids.get(i) {
                Some(Value::UInt32(r)) => *r,
                other => {
                    return Err(StrataError::corruption(format!(
                        "delta rowid column holds {other:?}"
                    )))
                }
            };
            let commit_ts = match commit_tss.get(i) {
                Some(Value::Binary(raw)) if raw.len() == 12 => {
                    let mut arr = [0u8; 12];
                    arr.copy_from_slice(raw);
                    Timestamp::from_be_bytes(arr)
                }
                other => {
                    return Err(StrataError::corruption(format!(
                        "delta commit_ts column holds {other:?}"
                    )))
                }
            };
            rows.push(DeltaRow { row, commit_ts });
        }
        let rows = Arc::new(rows);
        *self.delta_cache.lock() = Some(Arc::clone(&rows));
        Ok(rows)
    }

    /// The delete mask at a snapshot: persisted delta entries with
    /// `commit_ts <= snapshot` merged with the resident chain.
    pub fn delete_mask_at(
        &self,
        fs: &dyn FileService,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> StrataResult<Bitmap> {
        let mut mask = self.deletes.mask_at(snapshot, txn_id);
        for delta in self.delta_rows(fs)?.iter() {
            if delta.commit_ts <= snapshot {
                mask.insert(delta.row);
            }
        }
        Ok(mask)
    }

    /// Probes a key against the zonemap and bloom summary.
    pub fn probe(&self, key_bytes: &[u8]) -> StrataResult<()> {
        self.immut.dedup(key_bytes)
    }

    /// Finds the row holding `key` in the primary-key column, ignoring
    /// deletes. Uses binary search when the block is sorted.
    pub fn find_key_row(
        &self,
        fs: &dyn FileService,
        cache: &ColumnCache,
        key: &Value,
    ) -> StrataResult<Option<u32>> {
        let Some(pk_pos) = self.schema.pk_pos() else {
            return Ok(None);
        };
        let col = self.read_column(fs, cache, pk_pos)?;
        let values = col.values();
        if self.sorted {
            let idx = values.partition_point(|v| v < key);
            if idx < values.len() && &values[idx] == key {
                return Ok(Some(idx as u32));
            }
            return Ok(None);
        }
        Ok(values.iter().position(|v| v == key).map(|i| i as u32))
    }
}

/// Encodes a timestamp as the 12-byte binary value used in delta and
/// logtail `commit_ts` columns.
#[must_use]
pub fn ts_value(ts: Timestamp) -> Value {
    Value::Binary(ts.to_be_bytes().to_vec())
}

/// Decodes a 12-byte binary `commit_ts` value.
pub fn value_ts(v: &Value) -> StrataResult<Timestamp> {
    match v {
        Value::Binary(raw) if raw.len() == 12 => {
            let mut arr = [0u8; 12];
            arr.copy_from_slice(raw);
            Ok(Timestamp::from_be_bytes(arr))
        }
        other => Err(StrataError::corruption(format!(
            "expected 12-byte commit_ts, got {other:?}"
        ))),
    }
}

/// Encodes a column vector to section bytes for an object writer.
#[must_use]
pub fn encode_column(col: &ColumnVector) -> Bytes {
    let mut buf = bytes::BytesMut::new();
    col.encode(&mut buf);
    buf.freeze()
}
