//! Table schemas.
//!
//! A schema is an ordered list of column definitions. Column identity is
//! the stable sequence number, not the logical position: renames and drops
//! change positions, never seqnums, and a dropped seqnum is never reused.
//! Every alteration bumps `version`; DDL requests carry the version they
//! were planned against and fail with a write-write conflict when it is
//! stale.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use strata_common::constants::{DEFAULT_BLOCK_MAX_ROWS, DEFAULT_SEGMENT_MAX_BLOCKS};
use strata_common::types::SeqNum;
use strata_common::{StrataError, StrataResult};

use crate::types::LogicalType;

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColDef {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub ty: LogicalType,
    /// Stable sequence number.
    pub seq_num: SeqNum,
    /// Whether this column is the primary key.
    pub is_pk: bool,
    /// Whether NULL values are allowed.
    pub nullable: bool,
}

/// A recognized table alteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterRequest {
    /// Insert a new column at a logical position.
    AddColumn {
        /// New column name.
        name: String,
        /// New column type.
        ty: LogicalType,
        /// Logical position to insert at.
        logical_pos: usize,
    },
    /// Drop the column with the given seqnum.
    RemoveColumn {
        /// Logical position at request time, for validation.
        logical_pos: usize,
        /// The column's stable identity.
        seq_num: SeqNum,
    },
    /// Rename the table.
    RenameTable {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
    /// Replace the opaque constraint payload.
    UpdateConstraint(Vec<u8>),
    /// Replace the table comment.
    UpdateComment(String),
}

/// An alteration bound to the schema version it was planned against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTableReq {
    /// Version the requester saw.
    pub expected_version: u32,
    /// The alteration.
    pub req: AlterRequest,
}

/// A table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Table name.
    pub name: String,
    /// Active columns, ordered by logical position.
    pub cols: Vec<ColDef>,
    /// Bumped on every alteration.
    pub version: u32,
    /// Next sequence number to hand out.
    pub next_seqnum: SeqNum,
    /// Seqnums of dropped columns, for replay and logtail mapping.
    pub dropped_attrs: Vec<SeqNum>,
    /// Rows per block before a new block is allocated.
    pub block_max_rows: u32,
    /// Blocks per segment before a new segment is allocated.
    pub segment_max_blocks: u16,
    /// Opaque constraint payload.
    pub constraint: Option<Vec<u8>>,
    /// Table comment.
    pub comment: String,
}

impl Schema {
    /// Creates a schema from `(name, type, is_pk)` column specs.
    pub fn new(
        name: impl Into<String>,
        cols: &[(&str, LogicalType, bool)],
    ) -> StrataResult<Self> {
        let mut defs = Vec::with_capacity(cols.len());
        let mut pk_seen = false;
        for (i, (col_name, ty, is_pk)) in cols.iter().enumerate() {
            if *is_pk {
                if pk_seen {
                    return Err(StrataError::invalid_argument(
                        "schema may have at most one primary key column",
                    ));
                }
                if !ty.is_pk_supported() {
                    return Err(StrataError::invalid_argument(format!(
                        "type {ty} cannot be a primary key"
                    )));
                }
                pk_seen = true;
            }
            defs.push(ColDef {
                name: (*col_name).to_string(),
                ty: *ty,
                seq_num: SeqNum::new(i as u16),
                is_pk: *is_pk,
                nullable: !is_pk,
            });
        }
        let schema = Self {
            name: name.into(),
            next_seqnum: SeqNum::new(defs.len() as u16),
            cols: defs,
            version: 0,
            dropped_attrs: Vec::new(),
            block_max_rows: DEFAULT_BLOCK_MAX_ROWS,
            segment_max_blocks: DEFAULT_SEGMENT_MAX_BLOCKS,
            constraint: None,
            comment: String::new(),
        };
        schema.check_names()?;
        Ok(schema)
    }

    fn check_names(&self) -> StrataResult<()> {
        for (i, a) in self.cols.iter().enumerate() {
            for b in &self.cols[i + 1..] {
                if a.name == b.name {
                    return Err(StrataError::duplicate(format!("column {}", a.name)));
                }
            }
        }
        Ok(())
    }

    /// Returns the number of active columns.
    #[must_use]
    pub fn col_count(&self) -> usize {
        self.cols.len()
    }

    /// Returns the logical position of the primary key column, if any.
    #[must_use]
    pub fn pk_pos(&self) -> Option<usize> {
        self.cols.iter().position(|c| c.is_pk)
    }

    /// Returns the primary key column definition, if any.
    #[must_use]
    pub fn pk_def(&self) -> Option<&ColDef> {
        self.cols.iter().find(|c| c.is_pk)
    }

    /// Returns true if blocks of this table keep primary-key sort order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.pk_pos().is_some()
    }

    /// Returns the logical position of the column with `seq_num`, or `None`
    /// if it is dropped or unknown.
    #[must_use]
    pub fn pos_of_seqnum(&self, seq_num: SeqNum) -> Option<usize> {
        self.cols.iter().position(|c| c.seq_num == seq_num)
    }

    /// Returns the column definition at a logical position.
    #[must_use]
    pub fn col(&self, pos: usize) -> Option<&ColDef> {
        self.cols.get(pos)
    }

    /// Applies an alteration, bumping the version. A stale
    /// `expected_version` fails with `WwConflict`.
    pub fn apply_alter(&mut self, alter: &AlterTableReq) -> StrataResult<()> {
        if alter.expected_version != self.version {
            return Err(StrataError::ww_conflict(format!(
                "table {} schema version {} (request planned against {})",
                self.name, self.version, alter.expected_version
            )));
        }
        match &alter.req {
            AlterRequest::AddColumn {
                name,
                ty,
                logical_pos,
            } => {
                if self.cols.iter().any(|c| &c.name == name) {
                    return Err(StrataError::duplicate(format!("column {name}")));
                }
                let pos = (*logical_pos).min(self.cols.len());
                let def = ColDef {
                    name: name.clone(),
                    ty: *ty,
                    seq_num: self.next_seqnum,
                    is_pk: false,
                    nullable: true,
                };
                self.next_seqnum = self.next_seqnum.next();
                self.cols.insert(pos, def);
            }
            AlterRequest::RemoveColumn { seq_num, .. } => {
                let pos = self
                    .pos_of_seqnum(*seq_num)
                    .ok_or_else(|| StrataError::not_found(format!("column seqnum {seq_num}")))?;
                if self.cols[pos].is_pk {
                    return Err(StrataError::invalid_argument(
                        "cannot drop the primary key column",
                    ));
                }
                self.cols.remove(pos);
                self.dropped_attrs.push(*seq_num);
            }
            AlterRequest::RenameTable { old, new } => {
                if &self.name != old {
                    return Err(StrataError::not_found(format!("table {old}")));
                }
                self.name = new.clone();
            }
            AlterRequest::UpdateConstraint(bytes) => {
                self.constraint = Some(bytes.clone());
            }
            AlterRequest::UpdateComment(comment) => {
                self.comment = comment.clone();
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Encodes the schema into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        put_str(buf, &self.name);
        buf.put_u32(self.version);
        buf.put_u16(self.next_seqnum.as_u16());
        buf.put_u32(self.block_max_rows);
        buf.put_u16(self.segment_max_blocks);
        buf.put_u16(self.cols.len() as u16);
        for c in &self.cols {
            put_str(buf, &c.name);
            buf.put_u8(c.ty.as_u8());
            buf.put_u16(c.seq_num.as_u16());
            buf.put_u8(u8::from(c.is_pk));
            buf.put_u8(u8::from(c.nullable));
        }
        buf.put_u16(self.dropped_attrs.len() as u16);
        for s in &self.dropped_attrs {
            buf.put_u16(s.as_u16());
        }
        match &self.constraint {
            Some(bytes) => {
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
            }
            None => buf.put_u32(u32::MAX),
        }
        put_str(buf, &self.comment);
    }

    /// Decodes a schema from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        let name = get_str(buf)?;
        if buf.remaining() < 14 {
            return Err(StrataError::corruption("truncated schema header"));
        }
        let version = buf.get_u32();
        let next_seqnum = SeqNum::new(buf.get_u16());
        let block_max_rows = buf.get_u32();
        let segment_max_blocks = buf.get_u16();
        let ncols = buf.get_u16() as usize;
        let mut cols = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            let col_name = get_str(buf)?;
            if buf.remaining() < 5 {
                return Err(StrataError::corruption("truncated column def"));
            }
            let ty = LogicalType::from_u8(buf.get_u8())
                .ok_or_else(|| StrataError::corruption("bad column type"))?;
            let seq_num = SeqNum::new(buf.get_u16());
            let is_pk = buf.get_u8() != 0;
            let nullable = buf.get_u8() != 0;
            cols.push(ColDef {
                name: col_name,
                ty,
                seq_num,
                is_pk,
                nullable,
            });
        }
        if buf.remaining() < 2 {
            return Err(StrataError::corruption("truncated dropped attrs"));
        }
        let ndropped = buf.get_u16() as usize;
        if buf.remaining() < ndropped * 2 {
            return Err(StrataError::corruption("truncated dropped attrs"));
        }
        let mut dropped_attrs = Vec::with_capacity(ndropped);
        for _ in 0..ndropped {
            dropped_attrs.push(SeqNum::new(buf.get_u16()));
        }
        if buf.remaining() < 4 {
            return Err(StrataError::corruption("truncated constraint"));
        }
        let clen = buf.get_u32();
        let constraint = if clen == u32::MAX {
            None
        } else {
            let clen = clen as usize;
            if buf.remaining() < clen {
                return Err(StrataError::corruption("truncated constraint payload"));
            }
            let mut bytes = vec![0u8; clen];
            buf.copy_to_slice(&mut bytes);
            Some(bytes)
        };
        let comment = get_str(buf)?;
        Ok(Self {
            name,
            cols,
            version,
            next_seqnum,
            dropped_attrs,
            block_max_rows,
            segment_max_blocks,
            constraint,
            comment,
        })
    }
}

fn put_str(buf: &mut impl BufMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut impl Buf) -> StrataResult<String> {
    if buf.remaining() < 4 {
        return Err(StrataError::corruption("truncated string"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(StrataError::corruption("truncated string payload"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| StrataError::corruption("string is not valid UTF-8"))
}
