//! Packed object references.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{FsError, FsResult};

/// A byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    /// Byte offset.
    pub offset: u64,
    /// Byte length.
    pub len: u64,
}

impl Extent {
    /// An extent covering an entire object.
    pub const WHOLE: Self = Self {
        offset: 0,
        len: u64::MAX,
    };

    /// Creates an extent.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// Returns the end offset, saturating.
    #[inline]
    #[must_use]
    pub const fn end(self) -> u64 {
        self.offset.saturating_add(self.len)
    }
}

/// A packed reference to block content inside an object: object name,
/// extent, row count, and the block's index within the object.
///
/// The encoding is reversible; the catalog stores these as opaque
/// `meta_loc` / `delta_loc` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Object name.
    pub object: String,
    /// Byte extent of the referenced region.
    pub extent: Extent,
    /// Number of rows in the referenced block.
    pub rows: u32,
    /// Index of the block within the object.
    pub block_idx: u16,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub fn new(object: impl Into<String>, extent: Extent, rows: u32, block_idx: u16) -> Self {
        Self {
            object: object.into(),
            extent,
            rows,
            block_idx,
        }
    }

    /// Packs the location into bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.object.len() + 28);
        buf.put_u16(self.object.len() as u16);
        buf.put_slice(self.object.as_bytes());
        buf.put_u64(self.extent.offset);
        buf.put_u64(self.extent.len);
        buf.put_u32(self.rows);
        buf.put_u16(self.block_idx);
        buf.freeze()
    }

    /// Unpacks a location from bytes.
    pub fn decode(mut buf: impl Buf) -> FsResult<Self> {
        if buf.remaining() < 2 {
            return Err(FsError::invalid_location("truncated location"));
        }
        let name_len = buf.get_u16() as usize;
        if buf.remaining() < name_len + 22 {
            return Err(FsError::invalid_location("truncated location body"));
        }
        let mut name = vec![0u8; name_len];
        buf.copy_to_slice(&mut name);
        let object = String::from_utf8(name)
            .map_err(|_| FsError::invalid_location("object name is not valid UTF-8"))?;
        let offset = buf.get_u64();
        let len = buf.get_u64();
        let rows = buf.get_u32();
        let block_idx = buf.get_u16();
        Ok(Self {
            object,
            extent: Extent::new(offset, len),
            rows,
            block_idx,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}+{}:{}r@{}]",
            self.object, self.extent.offset, self.extent.len, self.rows, self.block_idx
        )
    }
}
