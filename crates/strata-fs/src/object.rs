//! Persisted object layout.
//!
//! One object holds one or more blocks. Per block the body carries the
//! encoded column extents, then a zonemap section (one per column), then an
//! optional bloom section for the primary key. A CRC-checked footer at the
//! tail records every extent; the last 16 bytes are a fixed trailer:
//!
//! ```text
//! [footer_len u32][footer_crc u32][block_count u16][version u16][magic u32]
//! ```
//!
//! Sections are opaque bytes here; encoding and decoding of columns,
//! zonemaps, and blooms belongs to the callers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_common::constants::{FORMAT_VERSION, OBJECT_MAGIC};

use crate::error::{FsError, FsResult};
use crate::location::{Extent, Location};
use crate::service::FileService;

const TRAILER_LEN: u64 = 16;

/// Extents of one block inside an object, parsed from the footer.
#[derive(Debug, Clone)]
pub struct BlockRegion {
    /// Rows in the block.
    pub rows: u32,
    /// One extent per column.
    pub columns: Vec<Extent>,
    /// One extent per column.
    pub zonemaps: Vec<Extent>,
    /// Primary-key bloom extent, if present.
    pub bloom: Option<Extent>,
}

struct PendingBlock {
    columns: Vec<Bytes>,
    zonemaps: Vec<Bytes>,
    bloom: Option<Bytes>,
    rows: u32,
}

/// Builds an object from per-block sections.
#[derive(Default)]
pub struct ObjectWriter {
    blocks: Vec<PendingBlock>,
}

impl ObjectWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block's sections. `columns` and `zonemaps` must be the
    /// same length.
    pub fn add_block(
        &mut self,
        columns: Vec<Bytes>,
        zonemaps: Vec<Bytes>,
        bloom: Option<Bytes>,
        rows: u32,
    ) -> FsResult<()> {
        if columns.len() != zonemaps.len() {
            return Err(FsError::corruption(format!(
                "{} columns but {} zonemaps",
                columns.len(),
                zonemaps.len()
            )));
        }
        self.blocks.push(PendingBlock {
            columns,
            zonemaps,
            bloom,
            rows,
        });
        Ok(())
    }

    /// Returns the number of staged blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Writes the object and returns one location per block, covering that
    /// block's body region.
    pub fn finish(self, fs: &dyn FileService, name: &str) -> FsResult<Vec<Location>> {
        let mut body = BytesMut::new();
        let mut regions = Vec::with_capacity(self.blocks.len());

        for block in &self.blocks {
            let mut columns = Vec::with_capacity(block.columns.len());
            for col in &block.columns {
                columns.push(Extent::new(body.len() as u64, col.len() as u64));
                body.put_slice(col);
            }
            let mut zonemaps = Vec::with_capacity(block.zonemaps.len());
            for zm in &block.zonemaps {
                zonemaps.push(Extent::new(body.len() as u64, zm.len() as u64));
                body.put_slice(zm);
            }
            let bloom = block.bloom.as_ref().map(|bf| {
                let extent = Extent::new(body.len() as u64, bf.len() as u64);
                body.put_slice(bf);
                extent
            });
            regions.push(BlockRegion {
                rows: block.rows,
                columns,
                zonemaps,
                bloom,
            });
        }

        let mut footer = BytesMut::new();
        for region in &regions {
            footer.put_u32(region.rows);
            footer.put_u16(region.columns.len() as u16);
            for e in region.columns.iter().chain(region.zonemaps.iter()) {
                footer.put_u64(e.offset);
                footer.put_u64(e.len);
            }
            match &region.bloom {
                Some(e) => {
                    footer.put_u64(e.offset);
                    footer.put_u64(e.len.max(1));
                }
                None => {
                    footer.put_u64(0);
                    footer.put_u64(0);
                }
            }
        }

        let footer_crc = crc32fast::hash(&footer);
        let mut payload = BytesMut::with_capacity(body.len() + footer.len() + 16);
        payload.put_slice(&body);
        payload.put_slice(&footer);
        payload.put_u32(footer.len() as u32);
        payload.put_u32(footer_crc);
        payload.put_u16(regions.len() as u16);
        payload.put_u16(FORMAT_VERSION);
        payload.put_u32(OBJECT_MAGIC);

        fs.write(name, payload.freeze())?;

        let locations = regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                let start = region
                    .columns
                    .first()
                    .map_or(0, |e| e.offset);
                let end = region
                    .bloom
                    .map(|e| e.end())
                    .or_else(|| region.zonemaps.last().map(|e| e.end()))
                    .unwrap_or(start);
                Location::new(name, Extent::new(start, end - start), region.rows, i as u16)
            })
            .collect();
        Ok(locations)
    }
}

/// Parses an object footer and serves extent reads of its sections.
#[derive(Debug)]
pub struct ObjectReader {
    object: String,
    blocks: Vec<BlockRegion>,
}

impl ObjectReader {
    /// Opens an object: reads and validates the trailer and footer.
    pub fn open(fs: &dyn FileService, object: &str) -> FsResult<Self> {
        let total = fs.size(object)?;
        if total < TRAILER_LEN {
            return Err(FsError::corruption(format!(
                "object '{object}' too small: {total} bytes"
            )));
        }
        let mut trailer = fs.read(object, Extent::new(total - TRAILER_LEN, TRAILER_LEN))?;
        let footer_len = trailer.get_u32() as u64;
        let footer_crc = trailer.get_u32();
        let block_count = trailer.get_u16() as usize;
        let version = trailer.get_u16();
        let magic = trailer.get_u32();
        if magic != OBJECT_MAGIC {
            return Err(FsError::corruption(format!(
                "object '{object}' has bad magic {magic:#x}"
            )));
        }
        if version != FORMAT_VERSION {
            return Err(FsError::corruption(format!(
                "object '{object}' has unsupported version {version}"
            )));
        }
        if total < TRAILER_LEN + footer_len {
            return Err(FsError::corruption(format!(
                "object '{object}' footer length {footer_len} out of range"
            )));
        }

        let mut footer = fs.read(
            object,
            Extent::new(total - TRAILER_LEN - footer_len, footer_len),
        )?;
        if crc32fast::hash(&footer) != footer_crc {
            return Err(FsError::corruption(format!(
                "object '{object}' footer checksum mismatch"
            )));
        }

        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            if footer.remaining() < 6 {
                return Err(FsError::corruption("truncated object footer"));
            }
            let rows = footer.get_u32();
            let ncols = footer.get_u16() as usize;
            if footer.remaining() < (ncols * 2 + 1) * 16 {
                return Err(FsError::corruption("truncated object footer extents"));
            }
            let mut read_extent = |buf: &mut Bytes| Extent::new(buf.get_u64(), buf.get_u64());
            let columns = (0..ncols).map(|_| read_extent(&mut footer)).collect();
            let zonemaps = (0..ncols).map(|_| read_extent(&mut footer)).collect();
            let bloom_extent = read_extent(&mut footer);
            let bloom = (bloom_extent.len > 0).then_some(bloom_extent);
            blocks.push(BlockRegion {
                rows,
                columns,
                zonemaps,
                bloom,
            });
        }

        Ok(Self {
            object: object.to_string(),
            blocks,
        })
    }

    /// Returns the object name.
    #[must_use]
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Returns the parsed block regions.
    #[must_use]
    pub fn blocks(&self) -> &[BlockRegion] {
        &self.blocks
    }

    fn block(&self, block_idx: u16) -> FsResult<&BlockRegion> {
        self.blocks.get(block_idx as usize).ok_or_else(|| {
            FsError::corruption(format!(
                "object '{}' has no block {block_idx}",
                self.object
            ))
        })
    }

    /// Reads one column's encoded bytes.
    pub fn read_column(
        &self,
        fs: &dyn FileService,
        block_idx: u16,
        col: usize,
    ) -> FsResult<Bytes> {
        let region = self.block(block_idx)?;
        let extent = region.columns.get(col).ok_or_else(|| {
            FsError::corruption(format!(
                "object '{}' block {block_idx} has no column {col}",
                self.object
            ))
        })?;
        fs.read(&self.object, *extent)
    }

    /// Reads one column's encoded zonemap bytes.
    pub fn read_zonemap(
        &self,
        fs: &dyn FileService,
        block_idx: u16,
        col: usize,
    ) -> FsResult<Bytes> {
        let region = self.block(block_idx)?;
        let extent = region.zonemaps.get(col).ok_or_else(|| {
            FsError::corruption(format!(
                "object '{}' block {block_idx} has no zonemap {col}",
                self.object
            ))
        })?;
        fs.read(&self.object, *extent)
    }

    /// Reads the block's encoded bloom bytes, if the block has one.
    pub fn read_bloom(&self, fs: &dyn FileService, block_idx: u16) -> FsResult<Option<Bytes>> {
        let region = self.block(block_idx)?;
        match region.bloom {
            Some(extent) => Ok(Some(fs.read(&self.object, extent)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemFs;

    #[test]
    fn test_write_read_roundtrip() {
        let fs = MemFs::new();
        let mut writer = ObjectWriter::new();
        writer
            .add_block(
                vec![Bytes::from_static(b"colA"), Bytes::from_static(b"colB")],
                vec![Bytes::from_static(b"zmA"), Bytes::from_static(b"zmB")],
                Some(Bytes::from_static(b"bloom0")),
                100,
            )
            .unwrap();
        writer
            .add_block(
                vec![Bytes::from_static(b"colC"), Bytes::from_static(b"colD")],
                vec![Bytes::from_static(b"zmC"), Bytes::from_static(b"zmD")],
                None,
                42,
            )
            .unwrap();

        let locs = writer.finish(&fs, "obj/1").unwrap();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].rows, 100);
        assert_eq!(locs[1].rows, 42);
        assert_eq!(locs[1].block_idx, 1);

        let reader = ObjectReader::open(&fs, "obj/1").unwrap();
        assert_eq!(reader.blocks().len(), 2);
        assert_eq!(&reader.read_column(&fs, 0, 1).unwrap()[..], b"colB");
        assert_eq!(&reader.read_zonemap(&fs, 1, 0).unwrap()[..], b"zmC");
        assert_eq!(&reader.read_bloom(&fs, 0).unwrap().unwrap()[..], b"bloom0");
        assert!(reader.read_bloom(&fs, 1).unwrap().is_none());
    }

    #[test]
    fn test_mismatched_sections_rejected() {
        let mut writer = ObjectWriter::new();
        let err = writer.add_block(
            vec![Bytes::from_static(b"col")],
            vec![],
            None,
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_corrupt_trailer_detected() {
        let fs = MemFs::new();
        let mut writer = ObjectWriter::new();
        writer
            .add_block(
                vec![Bytes::from_static(b"c")],
                vec![Bytes::from_static(b"z")],
                None,
                1,
            )
            .unwrap();
        writer.finish(&fs, "obj/bad").unwrap();

        // Flip a footer byte.
        let mut raw = fs.read("obj/bad", Extent::WHOLE).unwrap().to_vec();
        let n = raw.len();
        raw[n - 20] ^= 0xff;
        fs.write("obj/bad", Bytes::from(raw)).unwrap();

        assert!(ObjectReader::open(&fs, "obj/bad").is_err());
    }
}
