//! Object storage for StrataDB.
//!
//! The engine treats storage as a service of named immutable objects with
//! byte-extent reads ([`FileService`]). A [`Location`] is the packed,
//! reversible reference `(object name, extent, row count, block index)`
//! recorded in the catalog as `meta_loc` / `delta_loc`.
//!
//! [`ObjectWriter`] and [`ObjectReader`] implement the persisted object
//! layout: per-block column extents, zonemap section, bloom section, and a
//! CRC-checked footer.

mod error;
mod location;
mod object;
mod service;

pub use error::{FsError, FsResult};
pub use location::{Extent, Location};
pub use object::{BlockRegion, ObjectReader, ObjectWriter};
pub use service::{FileService, LocalFs, MemFs};
