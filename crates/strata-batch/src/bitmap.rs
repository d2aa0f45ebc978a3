//! Row-offset bitmap.
//!
//! Delete masks and logtail row sets are sets of `u32` row offsets. The
//! representation is a plain word array, dense in the row domain of a block
//! (at most `block_max_rows` bits).

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use strata_common::{StrataError, StrataResult};

/// A set of `u32` row offsets backed by a word array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitmap containing `lo..=hi`.
    #[must_use]
    pub fn from_range(lo: u32, hi: u32) -> Self {
        let mut bm = Self::new();
        for row in lo..=hi {
            bm.insert(row);
        }
        bm
    }

    /// Inserts a row offset.
    pub fn insert(&mut self, row: u32) {
        let word = (row / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (row % 64);
    }

    /// Removes a row offset. Returns true if it was present.
    pub fn remove(&mut self, row: u32) -> bool {
        let word = (row / 64) as usize;
        if word >= self.words.len() {
            return false;
        }
        let mask = 1 << (row % 64);
        let present = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        present
    }

    /// Checks whether a row offset is present.
    #[must_use]
    pub fn contains(&self, row: u32) -> bool {
        let word = (row / 64) as usize;
        word < self.words.len() && self.words[word] & (1 << (row % 64)) != 0
    }

    /// Returns the number of rows in the set.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Unions `other` into this set.
    pub fn union(&mut self, other: &Bitmap) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= src;
        }
    }

    /// Iterates row offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..64).filter_map(move |bit| {
                if word & (1 << bit) != 0 {
                    Some(wi as u32 * 64 + bit)
                } else {
                    None
                }
            })
        })
    }

    /// Encodes the bitmap into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.words.len() as u32);
        for w in &self.words {
            buf.put_u64(*w);
        }
    }

    /// Decodes a bitmap from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 4 {
            return Err(StrataError::corruption("truncated bitmap"));
        }
        let n = buf.get_u32() as usize;
        if buf.remaining() < n * 8 {
            return Err(StrataError::corruption("truncated bitmap words"));
        }
        let mut words = Vec::with_capacity(n);
        for _ in 0..n {
            words.push(buf.get_u64());
        }
        Ok(Self { words })
    }
}

impl FromIterator<u32> for Bitmap {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut bm = Self::new();
        for row in iter {
            bm.insert(row);
        }
        bm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains() {
        let mut bm = Bitmap::new();
        bm.insert(0);
        bm.insert(63);
        bm.insert(64);
        bm.insert(1000);
        assert!(bm.contains(0));
        assert!(bm.contains(63));
        assert!(bm.contains(64));
        assert!(bm.contains(1000));
        assert!(!bm.contains(1));
        assert_eq!(bm.cardinality(), 4);
    }

    #[test]
    fn test_remove() {
        let mut bm = Bitmap::from_range(5, 9);
        assert_eq!(bm.cardinality(), 5);
        assert!(bm.remove(7));
        assert!(!bm.remove(7));
        assert!(!bm.contains(7));
        assert_eq!(bm.cardinality(), 4);
    }

    #[test]
    fn test_union_and_iter() {
        let mut a: Bitmap = [1u32, 3, 5].into_iter().collect();
        let b: Bitmap = [3u32, 4, 200].into_iter().collect();
        a.union(&b);
        let rows: Vec<u32> = a.iter().collect();
        assert_eq!(rows, vec![1, 3, 4, 5, 200]);
    }

    #[test]
    fn test_encode_decode() {
        let bm: Bitmap = [0u32, 64, 65, 300].into_iter().collect();
        let mut buf = bytes::BytesMut::new();
        bm.encode(&mut buf);
        let decoded = Bitmap::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, bm);
    }
}
