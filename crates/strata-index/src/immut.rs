//! Immutable index summary of a persisted block.
//!
//! Probe order is zonemap fast-intersect, then bloom filter, then
//! `ExpectedPossibleDup`: the caller performs the exact check against the
//! loaded key column only when both probabilistic layers say "maybe".

use bytes::{Buf, BufMut};
use strata_common::{StrataError, StrataResult};

use crate::bloom::BloomFilter;
use crate::zonemap::ZoneMap;

/// Zonemap + bloom summary over a persisted block's primary key.
#[derive(Debug, Clone)]
pub struct ImmutIndex {
    zonemap: ZoneMap,
    bloom: BloomFilter,
}

impl ImmutIndex {
    /// Builds the summary from the block's key bytes.
    #[must_use]
    pub fn build<'a>(
        keys: impl IntoIterator<Item = &'a [u8]> + Clone,
        bloom_fpp: f64,
    ) -> Self {
        let count = keys.clone().into_iter().count();
        let mut bloom = BloomFilter::with_rate(count, bloom_fpp);
        for key in keys.clone() {
            bloom.insert(key);
        }
        Self {
            zonemap: ZoneMap::from_keys(keys),
            bloom,
        }
    }

    /// Creates the summary from already-built parts.
    #[must_use]
    pub fn from_parts(zonemap: ZoneMap, bloom: BloomFilter) -> Self {
        Self { zonemap, bloom }
    }

    /// Returns the zonemap.
    #[must_use]
    pub fn zonemap(&self) -> &ZoneMap {
        &self.zonemap
    }

    /// Probes one key. `Ok(())` means definitely absent;
    /// `ExpectedPossibleDup` means the caller must do the exact check.
    pub fn dedup(&self, key: &[u8]) -> StrataResult<()> {
        if !self.zonemap.contains(key) {
            return Ok(());
        }
        if !self.bloom.may_contain(key) {
            return Ok(());
        }
        Err(StrataError::ExpectedPossibleDup)
    }

    /// Probes a batch of keys with a precomputed `[min, max]` range.
    /// `Ok(())` means every key is definitely absent.
    pub fn batch_dedup(
        &self,
        keys: &[Vec<u8>],
        keys_min: &[u8],
        keys_max: &[u8],
    ) -> StrataResult<()> {
        if !self.zonemap.fast_intersect(keys_min, keys_max) {
            return Ok(());
        }
        let in_range: Vec<&[u8]> = keys
            .iter()
            .map(Vec::as_slice)
            .filter(|k| self.zonemap.contains(k))
            .collect();
        if in_range.is_empty() {
            return Ok(());
        }
        if in_range.iter().any(|k| self.bloom.may_contain(k)) {
            return Err(StrataError::ExpectedPossibleDup);
        }
        Ok(())
    }

    /// Encodes the summary into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        self.zonemap.encode(buf);
        self.bloom.encode(buf);
    }

    /// Decodes a summary from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        Ok(Self {
            zonemap: ZoneMap::decode(buf)?,
            bloom: BloomFilter::decode(buf)?,
        })
    }
}
