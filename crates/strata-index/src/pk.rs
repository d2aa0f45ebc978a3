//! Mutable primary-key index for appendable blocks.
//!
//! Maps a key to every row offset it was ever appended at. Visibility of a
//! candidate row (uncommitted append, deleted at snapshot) is the caller's
//! concern; the append-delete-append cycle means one key can legitimately
//! map to several rows with at most one alive.

use std::collections::{BTreeMap, HashMap};

use strata_batch::Value;

/// Index backing, chosen by whether the schema keeps sort order.
#[derive(Debug)]
enum Backing {
    Hash(HashMap<Value, Vec<u32>>),
    Sorted(BTreeMap<Value, Vec<u32>>),
}

/// A mutable key → row-offsets index.
#[derive(Debug)]
pub struct PrimaryKeyIndex {
    backing: Backing,
}

impl PrimaryKeyIndex {
    /// Creates an index; `sorted` selects an ordered backing so iteration
    /// yields keys in order.
    #[must_use]
    pub fn new(sorted: bool) -> Self {
        Self {
            backing: if sorted {
                Backing::Sorted(BTreeMap::new())
            } else {
                Backing::Hash(HashMap::new())
            },
        }
    }

    /// Records that `key` was appended at `row`.
    pub fn insert(&mut self, key: Value, row: u32) {
        match &mut self.backing {
            Backing::Hash(m) => m.entry(key).or_default().push(row),
            Backing::Sorted(m) => m.entry(key).or_default().push(row),
        }
    }

    /// Removes one `(key, row)` pairing, used when an append is rolled back.
    pub fn remove(&mut self, key: &Value, row: u32) {
        let rows = match &mut self.backing {
            Backing::Hash(m) => m.get_mut(key),
            Backing::Sorted(m) => m.get_mut(key),
        };
        if let Some(rows) = rows {
            rows.retain(|&r| r != row);
            if rows.is_empty() {
                match &mut self.backing {
                    Backing::Hash(m) => {
                        m.remove(key);
                    }
                    Backing::Sorted(m) => {
                        m.remove(key);
                    }
                }
            }
        }
    }

    /// Returns every row offset `key` was appended at, oldest first.
    #[must_use]
    pub fn candidates(&self, key: &Value) -> &[u32] {
        match &self.backing {
            Backing::Hash(m) => m.get(key).map_or(&[], Vec::as_slice),
            Backing::Sorted(m) => m.get(key).map_or(&[], Vec::as_slice),
        }
    }

    /// Returns true if the key has any candidate row.
    #[must_use]
    pub fn contains(&self, key: &Value) -> bool {
        !self.candidates(key).is_empty()
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        match &self.backing {
            Backing::Hash(m) => m.len(),
            Backing::Sorted(m) => m.len(),
        }
    }

    /// Iterates `(key, rows)` pairs; ordered when the backing is sorted.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&Value, &[u32])> + '_> {
        match &self.backing {
            Backing::Hash(m) => Box::new(m.iter().map(|(k, v)| (k, v.as_slice()))),
            Backing::Sorted(m) => Box::new(m.iter().map(|(k, v)| (k, v.as_slice()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_candidates() {
        let mut idx = PrimaryKeyIndex::new(false);
        idx.insert(Value::Int64(1), 0);
        idx.insert(Value::Int64(1), 5);
        idx.insert(Value::Int64(2), 1);

        assert_eq!(idx.candidates(&Value::Int64(1)), &[0, 5]);
        assert_eq!(idx.candidates(&Value::Int64(3)), &[] as &[u32]);
        assert_eq!(idx.key_count(), 2);
    }

    #[test]
    fn test_remove() {
        let mut idx = PrimaryKeyIndex::new(false);
        idx.insert(Value::Int64(1), 0);
        idx.insert(Value::Int64(1), 3);
        idx.remove(&Value::Int64(1), 0);
        assert_eq!(idx.candidates(&Value::Int64(1)), &[3]);
        idx.remove(&Value::Int64(1), 3);
        assert!(!idx.contains(&Value::Int64(1)));
        assert_eq!(idx.key_count(), 0);
    }

    #[test]
    fn test_sorted_iteration() {
        let mut idx = PrimaryKeyIndex::new(true);
        idx.insert(Value::Int64(3), 2);
        idx.insert(Value::Int64(1), 0);
        idx.insert(Value::Int64(2), 1);

        let keys: Vec<i64> = idx
            .iter()
            .map(|(k, _)| match k {
                Value::Int64(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
