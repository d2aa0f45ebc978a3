//! Index structures for StrataDB blocks.
//!
//! Appendable blocks carry a mutable primary-key index
//! ([`pk::PrimaryKeyIndex`]). Persisted blocks carry an immutable summary:
//! a [`zonemap::ZoneMap`] per column and a [`bloom::BloomFilter`] over the
//! primary key, probed through [`immut::ImmutIndex`]. Decoded column
//! extents are cached in [`lru::SyncLruCache`].

pub mod bloom;
pub mod immut;
pub mod lru;
pub mod pk;
pub mod zonemap;

pub use bloom::BloomFilter;
pub use immut::ImmutIndex;
pub use lru::SyncLruCache;
pub use pk::PrimaryKeyIndex;
pub use zonemap::ZoneMap;
