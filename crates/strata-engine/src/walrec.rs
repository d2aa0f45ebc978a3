//! Durable command encoding.
//!
//! A committed transaction is serialized as a list of commands carrying
//! its commit timestamp. The same encoding backs WAL records, incremental
//! checkpoint objects, and global checkpoint objects, so replay is one
//! code path: decode commands, apply idempotently.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_batch::{AlterRequest, AlterTableReq, Batch, Bitmap, LogicalType, Schema};
use strata_common::types::{
    BlockId, DatabaseId, SegmentId, SeqNum, TableId, TenantId, Timestamp, TxnId,
};
use strata_common::{StrataError, StrataResult};
use strata_fs::Location;
use strata_wal::RecordKind;

/// One durable command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Database creation.
    CreateDatabase {
        /// New id.
        id: DatabaseId,
        /// Owning tenant.
        tenant: TenantId,
        /// Name.
        name: String,
    },
    /// Database soft-delete.
    DropDatabase {
        /// Target id.
        id: DatabaseId,
    },
    /// Table creation with its initial schema.
    CreateTable {
        /// Owning database.
        db: DatabaseId,
        /// New id.
        id: TableId,
        /// Owning tenant.
        tenant: TenantId,
        /// Initial schema.
        schema: Schema,
    },
    /// Table soft-delete.
    DropTable {
        /// Owning database.
        db: DatabaseId,
        /// Target id.
        id: TableId,
    },
    /// Schema alteration.
    Alter {
        /// Owning database.
        db: DatabaseId,
        /// Target table.
        table: TableId,
        /// The request, with its expected version.
        alter: AlterTableReq,
    },
    /// Segment creation.
    CreateSegment {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// New id.
        segment: SegmentId,
        /// Whether blocks keep primary-key order.
        sorted: bool,
        /// Whether the append path may place new blocks here.
        appendable: bool,
    },
    /// Segment soft-delete.
    DropSegment {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// Target id.
        segment: SegmentId,
    },
    /// Appendable block creation.
    CreateBlock {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// New block id.
        block: BlockId,
    },
    /// Block soft-delete (retired by flush or merge).
    SoftDeleteBlock {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// Target block.
        block: BlockId,
    },
    /// Row append into an appendable block.
    Append {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// Target block.
        block: BlockId,
        /// First row of the run.
        start_row: u32,
        /// The rows.
        batch: Batch,
    },
    /// Row deletes against a block.
    Delete {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// Target block.
        block: BlockId,
        /// Deleted row offsets.
        rows: Bitmap,
    },
    /// Persisted block installation (`meta_loc`).
    InstallMeta {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// New persisted block id.
        block: BlockId,
        /// Column location.
        meta_loc: Location,
        /// Schema version the block was written under.
        schema_version: u32,
        /// Whether rows are in primary-key order.
        sorted: bool,
    },
    /// Delta-delete installation (`delta_loc`).
    InstallDelta {
        /// Owning database.
        db: DatabaseId,
        /// Owning table.
        table: TableId,
        /// Target persisted block.
        block: BlockId,
        /// Persisted-delete location.
        delta_loc: Location,
        /// Resident deletes at or below this timestamp are covered.
        flushed_upto: Timestamp,
    },
}

impl Command {
    /// The WAL record kind this command belongs to.
    #[must_use]
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Command::CreateDatabase { .. }
            | Command::DropDatabase { .. }
            | Command::CreateTable { .. }
            | Command::DropTable { .. } => RecordKind::CatalogOp,
            Command::Alter { .. } => RecordKind::AlterOp,
            _ => RecordKind::BlockMutation,
        }
    }
}

/// A committed transaction's durable payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnPayload {
    /// The committing transaction.
    pub txn_id: TxnId,
    /// Assigned commit timestamp.
    pub commit_ts: Timestamp,
    /// Commands in application order.
    pub commands: Vec<Command>,
}

impl TxnPayload {
    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.txn_id.as_u64());
        buf.put_slice(&self.commit_ts.to_be_bytes());
        buf.put_u32(self.commands.len() as u32);
        for cmd in &self.commands {
            encode_command(&mut buf, cmd);
        }
        buf.freeze()
    }

    /// Decodes a payload.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 24 {
            return Err(StrataError::corruption("truncated txn payload"));
        }
        let txn_id = TxnId::new(buf.get_u64());
        let mut ts_raw = [0u8; 12];
        buf.copy_to_slice(&mut ts_raw);
        let commit_ts = Timestamp::from_be_bytes(ts_raw);
        let count = buf.get_u32() as usize;
        let mut commands = Vec::with_capacity(count);
        for _ in 0..count {
            commands.push(decode_command(buf)?);
        }
        Ok(Self {
            txn_id,
            commit_ts,
            commands,
        })
    }
}

const TAG_CREATE_DATABASE: u8 = 1;
const TAG_DROP_DATABASE: u8 = 2;
const TAG_CREATE_TABLE: u8 = 3;
const TAG_DROP_TABLE: u8 = 4;
const TAG_ALTER: u8 = 5;
const TAG_CREATE_SEGMENT: u8 = 6;
const TAG_DROP_SEGMENT: u8 = 7;
const TAG_CREATE_BLOCK: u8 = 8;
const TAG_SOFT_DELETE_BLOCK: u8 = 9;
const TAG_APPEND: u8 = 10;
const TAG_DELETE: u8 = 11;
const TAG_INSTALL_META: u8 = 12;
const TAG_INSTALL_DELTA: u8 = 13;

fn put_str(buf: &mut BytesMut, s: &str) {
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
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| StrataError::corruption("string is not valid UTF-8"))
}

fn put_block(buf: &mut BytesMut, block: BlockId) {
    buf.put_slice(&block.to_be_bytes());
}

fn get_block(buf: &mut impl Buf) -> StrataResult<BlockId> {
    if buf.remaining() < 20 {
        return Err(StrataError::corruption("truncated block id"));
    }
    let mut raw = [0u8; 20];
    buf.copy_to_slice(&mut raw);
    Ok(BlockId::from_be_bytes(raw))
}

fn put_location(buf: &mut BytesMut, loc: &Location) {
    let packed = loc.encode();
    buf.put_u32(packed.len() as u32);
    buf.put_slice(&packed);
}

fn get_location(buf: &mut impl Buf) -> StrataResult<Location> {
    if buf.remaining() < 4 {
        return Err(StrataError::corruption("truncated location"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(StrataError::corruption("truncated location payload"));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(Location::decode(raw.as_slice())?)
}

fn encode_alter(buf: &mut BytesMut, alter: &AlterTableReq) {
    buf.put_u32(alter.expected_version);
    match &alter.req {
        AlterRequest::AddColumn {
            name,
            ty,
            logical_pos,
        } => {
            buf.put_u8(1);
            put_str(buf, name);
            buf.put_u8(ty.as_u8());
            buf.put_u32(*logical_pos as u32);
        }
        AlterRequest::RemoveColumn {
            logical_pos,
            seq_num,
        } => {
            buf.put_u8(2);
            buf.put_u32(*logical_pos as u32);
            buf.put_u16(seq_num.as_u16());
        }
        AlterRequest::RenameTable { old, new } => {
            buf.put_u8(3);
            put_str(buf, old);
            put_str(buf, new);
        }
        AlterRequest::UpdateConstraint(bytes) => {
            buf.put_u8(4);
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }
        AlterRequest::UpdateComment(comment) => {
            buf.put_u8(5);
            put_str(buf, comment);
        }
    }
}

fn decode_alter(buf: &mut impl Buf) -> StrataResult<AlterTableReq> {
    if buf.remaining() < 5 {
        return Err(StrataError::corruption("truncated alter request"));
    }
    let expected_version = buf.get_u32();
    let req = match buf.get_u8() {
        1 => {
            let name = get_str(buf)?;
            if buf.remaining() < 5 {
                return Err(StrataError::corruption("truncated add-column"));
            }
            let ty = LogicalType::from_u8(buf.get_u8())
                .ok_or_else(|| StrataError::corruption("bad column type in alter"))?;
            let logical_pos = buf.get_u32() as usize;
            AlterRequest::AddColumn {
                name,
                ty,
                logical_pos,
            }
        }
        2 => {
            if buf.remaining() < 6 {
                return Err(StrataError::corruption("truncated remove-column"));
            }
            let logical_pos = buf.get_u32() as usize;
            let seq_num = SeqNum::new(buf.get_u16());
            AlterRequest::RemoveColumn {
                logical_pos,
                seq_num,
            }
        }
        3 => AlterRequest::RenameTable {
            old: get_str(buf)?,
            new: get_str(buf)?,
        },
        4 => {
            if buf.remaining() < 4 {
                return Err(StrataError::corruption("truncated constraint"));
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(StrataError::corruption("truncated constraint payload"));
            }
            let mut raw = vec![0u8; len];
            buf.copy_to_slice(&mut raw);
            AlterRequest::UpdateConstraint(raw)
        }
        5 => AlterRequest::UpdateComment(get_str(buf)?),
        tag => {
            return Err(StrataError::corruption(format!("bad alter tag {tag}")));
        }
    };
    Ok(AlterTableReq {
        expected_version,
        req,
    })
}

fn encode_command(buf: &mut BytesMut, cmd: &Command) {
    match cmd {
        Command::CreateDatabase { id, tenant, name } => {
            buf.put_u8(TAG_CREATE_DATABASE);
            buf.put_u64(id.as_u64());
            buf.put_u32(tenant.as_u32());
            put_str(buf, name);
        }
        Command::DropDatabase { id } => {
            buf.put_u8(TAG_DROP_DATABASE);
            buf.put_u64(id.as_u64());
        }
        Command::CreateTable {
            db,
            id,
            tenant,
            schema,
        } => {
            buf.put_u8(TAG_CREATE_TABLE);
            buf.put_u64(db.as_u64());
            buf.put_u64(id.as_u64());
            buf.put_u32(tenant.as_u32());
            schema.encode(buf);
        }
        Command::DropTable { db, id } => {
            buf.put_u8(TAG_DROP_TABLE);
            buf.put_u64(db.as_u64());
            buf.put_u64(id.as_u64());
        }
        Command::Alter { db, table, alter } => {
            buf.put_u8(TAG_ALTER);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            encode_alter(buf, alter);
        }
        Command::CreateSegment {
            db,
            table,
            segment,
            sorted,
            appendable,
        } => {
            buf.put_u8(TAG_CREATE_SEGMENT);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            buf.put_slice(&segment.to_be_bytes());
            let mut flags = 0u8;
            if *sorted {
                flags |= 1;
            }
            if *appendable {
                flags |= 2;
            }
            buf.put_u8(flags);
        }
        Command::DropSegment { db, table, segment } => {
            buf.put_u8(TAG_DROP_SEGMENT);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            buf.put_slice(&segment.to_be_bytes());
        }
        Command::CreateBlock { db, table, block } => {
            buf.put_u8(TAG_CREATE_BLOCK);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
        }
        Command::SoftDeleteBlock { db, table, block } => {
            buf.put_u8(TAG_SOFT_DELETE_BLOCK);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
        }
        Command::Append {
            db,
            table,
            block,
            start_row,
            batch,
        } => {
            buf.put_u8(TAG_APPEND);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
            buf.put_u32(*start_row);
            batch.encode(buf);
        }
        Command::Delete {
            db,
            table,
            block,
            rows,
        } => {
            buf.put_u8(TAG_DELETE);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
            rows.encode(buf);
        }
        Command::InstallMeta {
            db,
            table,
            block,
            meta_loc,
            schema_version,
            sorted,
        } => {
            buf.put_u8(TAG_INSTALL_META);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
            put_location(buf, meta_loc);
            buf.put_u32(*schema_version);
            buf.put_u8(u8::from(*sorted));
        }
        Command::InstallDelta {
            db,
            table,
            block,
            delta_loc,
            flushed_upto,
        } => {
            buf.put_u8(TAG_INSTALL_DELTA);
            buf.put_u64(db.as_u64());
            buf.put_u64(table.as_u64());
            put_block(buf, *block);
            put_location(buf, delta_loc);
            buf.put_slice(&flushed_upto.to_be_bytes());
        }
    }
}

fn decode_command(buf: &mut impl Buf) -> StrataResult<Command> {
    if buf.remaining() < 1 {
        return Err(StrataError::corruption("truncated command"));
    }
    let tag = buf.get_u8();
    let need = |buf: &mut dyn Buf, n: usize| -> StrataResult<()> {
        if buf.remaining() < n {
            Err(StrataError::corruption("truncated command body"))
        } else {
            Ok(())
        }
    };
    let cmd = match tag {
        TAG_CREATE_DATABASE => {
            need(buf, 12)?;
            Command::CreateDatabase {
                id: DatabaseId::new(buf.get_u64()),
                tenant: TenantId::new(buf.get_u32()),
                name: get_str(buf)?,
            }
        }
        TAG_DROP_DATABASE => {
            need(buf, 8)?;
            Command::DropDatabase {
                id: DatabaseId::new(buf.get_u64()),
            }
        }
        TAG_CREATE_TABLE => {
            need(buf, 20)?;
            Command::CreateTable {
                db: DatabaseId::new(buf.get_u64()),
                id: TableId::new(buf.get_u64()),
                tenant: TenantId::new(buf.get_u32()),
                schema: Schema::decode(buf)?,
            }
        }
        TAG_DROP_TABLE => {
            need(buf, 16)?;
            Command::DropTable {
                db: DatabaseId::new(buf.get_u64()),
                id: TableId::new(buf.get_u64()),
            }
        }
        TAG_ALTER => {
            need(buf, 16)?;
            Command::Alter {
                db: DatabaseId::new(buf.get_u64()),
                table: TableId::new(buf.get_u64()),
                alter: decode_alter(buf)?,
            }
        }
        TAG_CREATE_SEGMENT => {
            need(buf, 33)?;
            let db = DatabaseId::new(buf.get_u64());
            let table = TableId::new(buf.get_u64());
            let mut seg = [0u8; 16];
            buf.copy_to_slice(&mut seg);
            let segment = SegmentId::from_be_bytes(seg);
            let flags = buf.get_u8();
            Command::CreateSegment {
                db,
                table,
                segment,
                sorted: flags & 1 != 0,
                appendable: flags & 2 != 0,
            }
        }
        TAG_DROP_SEGMENT => {
            need(buf, 32)?;
            let db = DatabaseId::new(buf.get_u64());
            let table = TableId::new(buf.get_u64());
            let mut seg = [0u8; 16];
            buf.copy_to_slice(&mut seg);
            Command::DropSegment {
                db,
                table,
                segment: SegmentId::from_be_bytes(seg),
            }
        }
        TAG_CREATE_BLOCK => {
            need(buf, 16)?;
            Command::CreateBlock {
                db: DatabaseId::new(buf.get_u64()),
                table: TableId::new(buf.get_u64()),
                block: get_block(buf)?,
            }
        }
        TAG_SOFT_DELETE_BLOCK => {
            need(buf, 16)?;
            Command::SoftDeleteBlock {
                db: DatabaseId::new(buf.get_u64()),
                table: TableId::new(buf.get_u64()),
                block: get_block(buf)?,
            }
        }
        TAG_APPEND => {
            need(buf, 16)?;
            let db = DatabaseId::new(buf.get_u64());
            let table = TableId::new(buf.get_u64());
            let block = get_block(buf)?;
            need(buf, 4)?;
            let start_row = buf.get_u32();
            Command::Append {
                db,
                table,
                block,
                start_row,
                batch: Batch::decode(buf)?,
            }
        }
        TAG_DELETE => {
            need(buf, 16)?;
            Command::Delete {
                db: DatabaseId::new(buf.get_u64()),
                table: TableId::new(buf.get_u64()),
                block: get_block(buf)?,
                rows: Bitmap::decode(buf)?,
            }
        }
        TAG_INSTALL_META => {
            need(buf, 16)?;
            let db = DatabaseId::new(buf.get_u64());
            let table = TableId::new(buf.get_u64());
            let block = get_block(buf)?;
            let meta_loc = get_location(buf)?;
            need(buf, 5)?;
            Command::InstallMeta {
                db,
                table,
                block,
                meta_loc,
                schema_version: buf.get_u32(),
                sorted: buf.get_u8() != 0,
            }
        }
        TAG_INSTALL_DELTA => {
            need(buf, 16)?;
            let db = DatabaseId::new(buf.get_u64());
            let table = TableId::new(buf.get_u64());
            let block = get_block(buf)?;
            let delta_loc = get_location(buf)?;
            need(buf, 12)?;
            let mut raw = [0u8; 12];
            buf.copy_to_slice(&mut raw);
            Command::InstallDelta {
                db,
                table,
                block,
                delta_loc,
                flushed_upto: Timestamp::from_be_bytes(raw),
            }
        }
        _ => {
            return Err(StrataError::corruption(format!("bad command tag {tag}")));
        }
    };
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_batch::mock::{mock_batch, mock_schema};
    use strata_fs::Extent;

    #[test]
    fn test_payload_roundtrip() {
        let schema = mock_schema(3, 0);
        let batch = mock_batch(&schema, 4);
        let block = BlockId::new(SegmentId::new(9), 2);
        let payload = TxnPayload {
            txn_id: TxnId::new(7),
            commit_ts: Timestamp::new(1000, 3),
            commands: vec![
                Command::CreateDatabase {
                    id: DatabaseId::new(2),
                    tenant: TenantId::new(1),
                    name: "db".into(),
                },
                Command::CreateTable {
                    db: DatabaseId::new(2),
                    id: TableId::new(5),
                    tenant: TenantId::new(1),
                    schema: schema.clone(),
                },
                Command::CreateSegment {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    segment: SegmentId::new(9),
                    sorted: true,
                    appendable: true,
                },
                Command::CreateBlock {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    block,
                },
                Command::Append {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    block,
                    start_row: 0,
                    batch,
                },
                Command::Delete {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    block,
                    rows: [1u32, 2].into_iter().collect(),
                },
                Command::InstallMeta {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    block: BlockId::new(SegmentId::new(9), 3),
                    meta_loc: Location::new("obj/1", Extent::new(0, 128), 4, 0),
                    schema_version: 0,
                    sorted: true,
                },
                Command::Alter {
                    db: DatabaseId::new(2),
                    table: TableId::new(5),
                    alter: AlterTableReq {
                        expected_version: 0,
                        req: AlterRequest::RenameTable {
                            old: "t1".into(),
                            new: "t2".into(),
                        },
                    },
                },
            ],
        };
        let mut encoded = payload.encode();
        let decoded = TxnPayload::decode(&mut encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_record_kind_split() {
        let cmd = Command::DropDatabase {
            id: DatabaseId::new(1),
        };
        assert_eq!(cmd.record_kind(), RecordKind::CatalogOp);
        let cmd = Command::Delete {
            db: DatabaseId::new(1),
            table: TableId::new(1),
            block: BlockId::new(SegmentId::new(1), 0),
            rows: Bitmap::new(),
        };
        assert_eq!(cmd.record_kind(), RecordKind::BlockMutation);
    }

    #[test]
    fn test_decode_garbage() {
        let mut buf: &[u8] = &[0xff, 0x00];
        assert!(TxnPayload::decode(&mut buf).is_err());
    }
}
