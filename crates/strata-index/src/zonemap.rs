//! Per-column min/max summaries.
//!
//! A zonemap stores order-preserving key bytes for the column minimum and
//! maximum. Variable-length bounds are truncated to
//! [`ZONEMAP_PREFIX_LEN`] bytes: the minimum rounds down (stored prefix
//! sorts at or below the true minimum) and the maximum rounds up (the
//! stored bound becomes exclusive), so a truncated bound can prune but
//! never prove presence.

use bytes::{Buf, BufMut};
use strata_common::constants::ZONEMAP_PREFIX_LEN;
use strata_common::{StrataError, StrataResult};

/// Min/max summary of one column within one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMap {
    min: Option<Vec<u8>>,
    max: Option<Vec<u8>>,
    /// When set, `max` is an exclusive rounded-up prefix.
    max_exclusive: bool,
    /// When set, the true maximum could not be rounded up (all 0xff);
    /// there is no usable upper bound.
    unbounded_above: bool,
}

impl ZoneMap {
    /// Creates an empty zonemap that contains nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min: None,
            max: None,
            max_exclusive: false,
            unbounded_above: false,
        }
    }

    /// Builds a zonemap from untruncated key bytes.
    #[must_use]
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut min: Option<Vec<u8>> = None;
        let mut max: Option<Vec<u8>> = None;
        for key in keys {
            match &mut min {
                Some(m) if key >= m.as_slice() => {}
                _ => min = Some(key.to_vec()),
            }
            match &mut max {
                Some(m) if key <= m.as_slice() => {}
                _ => max = Some(key.to_vec()),
            }
        }
        let (Some(full_min), Some(full_max)) = (min, max) else {
            return Self::new();
        };

        // Round the min down: a prefix always sorts <= the full key.
        let min = full_min[..full_min.len().min(ZONEMAP_PREFIX_LEN)].to_vec();

        if full_max.len() <= ZONEMAP_PREFIX_LEN {
            Self {
                min: Some(min),
                max: Some(full_max),
                max_exclusive: false,
                unbounded_above: false,
            }
        } else {
            // Round the max up to an exclusive prefix bound.
            match increment(&full_max[..ZONEMAP_PREFIX_LEN]) {
                Some(upper) => Self {
                    min: Some(min),
                    max: Some(upper),
                    max_exclusive: true,
                    unbounded_above: false,
                },
                None => Self {
                    min: Some(min),
                    max: None,
                    max_exclusive: false,
                    unbounded_above: true,
                },
            }
        }
    }

    /// Returns true if the zonemap has seen any key.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.min.is_some()
    }

    /// Returns false only when the key is definitely absent from the block.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let Some(min) = &self.min else {
            return false;
        };
        if key < min.as_slice() {
            return false;
        }
        if self.unbounded_above {
            return true;
        }
        match &self.max {
            Some(max) if self.max_exclusive => key < max.as_slice(),
            Some(max) => key <= max.as_slice(),
            None => false,
        }
    }

    /// Returns false only when the key range `[keys_min, keys_max]` cannot
    /// intersect this zonemap.
    #[must_use]
    pub fn fast_intersect(&self, keys_min: &[u8], keys_max: &[u8]) -> bool {
        let Some(min) = &self.min else {
            return false;
        };
        if keys_max < min.as_slice() {
            return false;
        }
        if self.unbounded_above {
            return true;
        }
        match &self.max {
            Some(max) if self.max_exclusive => keys_min < max.as_slice(),
            Some(max) => keys_min <= max.as_slice(),
            None => false,
        }
    }

    /// Returns false only when every key is definitely absent.
    #[must_use]
    pub fn fast_contains_any<'a>(&self, keys: impl IntoIterator<Item = &'a [u8]>) -> bool {
        keys.into_iter().any(|k| self.contains(k))
    }

    /// Encodes the zonemap into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let mut flags = 0u8;
        if self.max_exclusive {
            flags |= 1;
        }
        if self.unbounded_above {
            flags |= 2;
        }
        buf.put_u8(flags);
        put_bound(buf, self.min.as_deref());
        put_bound(buf, self.max.as_deref());
    }

    /// Decodes a zonemap from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 1 {
            return Err(StrataError::corruption("truncated zonemap"));
        }
        let flags = buf.get_u8();
        Ok(Self {
            max_exclusive: flags & 1 != 0,
            unbounded_above: flags & 2 != 0,
            min: get_bound(buf)?,
            max: get_bound(buf)?,
        })
    }
}

impl Default for ZoneMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the byte string one greater than `bytes` at the same length, or
/// `None` when every byte is already 0xff.
fn increment(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = bytes.to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != 0xff {
            out[i] += 1;
            out.truncate(i + 1);
            return Some(out);
        }
    }
    None
}

fn put_bound(buf: &mut impl BufMut, bound: Option<&[u8]>) {
    match bound {
        Some(b) => {
            buf.put_u16(b.len() as u16);
            buf.put_slice(b);
        }
        None => buf.put_u16(u16::MAX),
    }
}

fn get_bound(buf: &mut impl Buf) -> StrataResult<Option<Vec<u8>>> {
    if buf.remaining() < 2 {
        return Err(StrataError::corruption("truncated zonemap bound"));
    }
    let len = buf.get_u16();
    if len == u16::MAX {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(StrataError::corruption("truncated zonemap bound bytes"));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_contains_nothing() {
        let zm = ZoneMap::new();
        assert!(!zm.contains(b"anything"));
        assert!(!zm.fast_intersect(b"a", b"z"));
    }

    #[test]
    fn test_short_keys_exact_bounds() {
        let keys: Vec<&[u8]> = vec![b"bravo", b"alpha", b"delta"];
        let zm = ZoneMap::from_keys(keys);
        assert!(zm.contains(b"alpha"));
        assert!(zm.contains(b"charlie"));
        assert!(zm.contains(b"delta"));
        assert!(!zm.contains(b"aardvark"));
        assert!(!zm.contains(b"echo"));
    }

    #[test]
    fn test_fast_intersect() {
        let keys: Vec<&[u8]> = vec![b"m", b"p"];
        let zm = ZoneMap::from_keys(keys);
        assert!(zm.fast_intersect(b"a", b"n"));
        assert!(zm.fast_intersect(b"o", b"z"));
        assert!(!zm.fast_intersect(b"a", b"c"));
        assert!(!zm.fast_intersect(b"q", b"z"));
    }

    #[test]
    fn test_long_min_rounds_down() {
        // 35 zero bytes truncates to a 30-byte prefix min.
        let long_min = vec![0u8; 35];
        let other = vec![9u8; 10];
        let zm = ZoneMap::from_keys([long_min.as_slice(), other.as_slice()]);

        // A 33-zero-byte key sits above the stored prefix but below the
        // true min: the zonemap may not prune it (no false negatives).
        assert!(zm.contains(&vec![0u8; 33]));
        // A key below the stored prefix is a definite miss.
        assert!(!zm.contains(&vec![0u8; 10]));
        // The exact min must remain a maybe.
        assert!(zm.contains(&long_min));
    }

    #[test]
    fn test_long_max_rounds_up() {
        let mut long_max = vec![0xffu8; 35];
        long_max[0] = 0x61; // "a..."
        long_max[1] = 0x62;
        long_max[2] = 0x63;
        let small = vec![0x10u8; 4];
        let zm = ZoneMap::from_keys([long_max.as_slice(), small.as_slice()]);

        // The exact max must remain a maybe despite truncation.
        assert!(zm.contains(&long_max));
        // "abd" sorts above the rounded-up prefix: definite miss.
        assert!(!zm.contains(b"abd"));
    }

    #[test]
    fn test_all_ff_max_is_unbounded() {
        let max = vec![0xffu8; 40];
        let zm = ZoneMap::from_keys([max.as_slice()]);
        assert!(zm.contains(&vec![0xffu8; 40]));
        assert!(zm.contains(&vec![0xffu8; 64]));
    }

    #[test]
    fn test_encode_decode() {
        let keys: Vec<Vec<u8>> = vec![vec![0u8; 35], vec![0xffu8; 35]];
        let zm = ZoneMap::from_keys(keys.iter().map(|k| k.as_slice()));
        let mut buf = bytes::BytesMut::new();
        zm.encode(&mut buf);
        let decoded = ZoneMap::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, zm);
    }
}
