//! Shared constants.

/// Magic number at the head of every WAL record frame (`"STLG"`).
pub const WAL_MAGIC: u32 = 0x5354_4C47;

/// Magic number in every persisted object footer (`"STOB"`).
pub const OBJECT_MAGIC: u32 = 0x5354_4F42;

/// On-disk format version for WAL frames and persisted objects.
pub const FORMAT_VERSION: u16 = 1;

/// Default rows per block when the schema does not override it.
pub const DEFAULT_BLOCK_MAX_ROWS: u32 = 8192;

/// Default blocks per segment when the schema does not override it.
pub const DEFAULT_SEGMENT_MAX_BLOCKS: u16 = 4;

/// Zonemap bounds for variable-length keys are truncated to this many bytes.
pub const ZONEMAP_PREFIX_LEN: usize = 30;

/// Object-name prefix for data objects written by flush and merge tasks.
pub const OBJECT_PREFIX: &str = "obj/";

/// Object-name prefix for delta-delete objects.
pub const DELTA_PREFIX: &str = "delta/";

/// Object-name prefix for checkpoint objects.
pub const CHECKPOINT_PREFIX: &str = "ckp/";

/// Name of the reserved system database.
pub const SYSTEM_DB_NAME: &str = "mo_catalog";

/// System table streaming database metadata to logtail subscribers.
pub const MO_DATABASE: &str = "mo_database";

/// System table streaming table metadata to logtail subscribers.
pub const MO_TABLES: &str = "mo_tables";

/// System table streaming column metadata to logtail subscribers.
pub const MO_COLUMNS: &str = "mo_columns";

/// Reserved logtail column carrying the physical row address.
pub const ATTR_ROWID: &str = "rowid";

/// Reserved logtail column carrying the mutation commit timestamp.
pub const ATTR_COMMIT_TS: &str = "commit_ts";

/// Reserved logtail column flagging aborted entries in delete batches.
pub const ATTR_ABORTED: &str = "aborted";
