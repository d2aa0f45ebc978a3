//! Bloom filter for probabilistic key membership.
//!
//! A bloom filter answers "definitely not present" with certainty and
//! "maybe present" otherwise. Persisted blocks carry one over their
//! primary-key bytes so dedup can skip loading the key column for most
//! blocks.

use std::hash::Hasher;

use bytes::{Buf, BufMut};
use siphasher::sip::SipHasher13;
use strata_common::{StrataError, StrataResult};

/// A bloom filter over byte keys.
///
/// # Example
///
/// ```
/// use strata_index::bloom::BloomFilter;
///
/// let mut filter = BloomFilter::with_rate(1000, 0.01);
/// filter.insert(b"hello");
/// assert!(filter.may_contain(b"hello"));
/// assert!(!filter.may_contain(b"world"));
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array.
    bits: Vec<u64>,
    /// Number of bits.
    num_bits: usize,
    /// Number of hash functions.
    num_hashes: usize,
    /// Number of keys inserted.
    count: usize,
}

impl BloomFilter {
    /// Creates a bloom filter with the given number of bits and hash
    /// functions.
    #[must_use]
    pub fn new(num_bits: usize, num_hashes: usize) -> Self {
        let num_bits = num_bits.max(64);
        let num_hashes = num_hashes.clamp(1, 16);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
            count: 0,
        }
    }

    /// Creates a bloom filter sized for `expected_keys` at the target
    /// false-positive rate.
    #[must_use]
    pub fn with_rate(expected_keys: usize, false_positive_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * p.ln()) / (ln2 * ln2)).ceil() as usize;
        let num_hashes = ((num_bits as f64 / n) * ln2).round() as usize;
        Self::new(num_bits, num_hashes)
    }

    /// Deterministic per-function seeds so encoded filters are portable.
    #[inline]
    fn seeds(i: usize) -> (u64, u64) {
        (
            0x517c_c1b7_2722_0a95u64.wrapping_add(i as u64),
            0x0fc9_4dc6_e6eb_8a5fu64.wrapping_add(i as u64 * 2),
        )
    }

    #[inline]
    fn bit_for(&self, key: &[u8], i: usize) -> usize {
        let (k0, k1) = Self::seeds(i);
        let mut hasher = SipHasher13::new_with_keys(k0, k1);
        hasher.write(key);
        (hasher.finish() % self.num_bits as u64) as usize
    }

    /// Inserts a key.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.num_hashes {
            let bit = self.bit_for(key, i);
            self.bits[bit / 64] |= 1 << (bit % 64);
        }
        self.count += 1;
    }

    /// Returns false if the key is definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_for(key, i);
            self.bits[bit / 64] & (1 << (bit % 64)) != 0
        })
    }

    /// Returns false if every key is definitely absent.
    #[must_use]
    pub fn may_contain_any(&self, keys: &[Vec<u8>]) -> bool {
        keys.iter().any(|k| self.may_contain(k))
    }

    /// Returns the number of keys inserted.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Estimated false-positive rate at the current fill.
    #[must_use]
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let set: usize = self.bits.iter().map(|w| w.count_ones() as usize).sum();
        let fill = set as f64 / self.num_bits as f64;
        fill.powi(self.num_hashes as i32)
    }

    /// Encodes the filter into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.num_bits as u32);
        buf.put_u8(self.num_hashes as u8);
        buf.put_u32(self.count as u32);
        buf.put_u32(self.bits.len() as u32);
        for w in &self.bits {
            buf.put_u64(*w);
        }
    }

    /// Decodes a filter from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 13 {
            return Err(StrataError::corruption("truncated bloom filter"));
        }
        let num_bits = buf.get_u32() as usize;
        let num_hashes = buf.get_u8() as usize;
        let count = buf.get_u32() as usize;
        let words = buf.get_u32() as usize;
        if buf.remaining() < words * 8 {
            return Err(StrataError::corruption("truncated bloom filter bits"));
        }
        if words != num_bits.div_ceil(64) || num_hashes == 0 {
            return Err(StrataError::corruption("inconsistent bloom filter header"));
        }
        let mut bits = Vec::with_capacity(words);
        for _ in 0..words {
            bits.push(buf.get_u64());
        }
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            count,
        })
    }
}
