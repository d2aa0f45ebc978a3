//! Block data: in-memory appendable stores, persisted readers, delete
//! chains, row transfer tables, and the views the read path returns.

pub mod appendable;
pub mod block_data;
pub mod deletes;
pub mod persisted;
pub mod transfer;
pub mod view;

pub use appendable::{AppendNode, AppendableData};
pub use block_data::BlockData;
pub use deletes::{DeleteChain, DeleteKind};
pub use persisted::{ColumnCache, ColumnCacheKey, PersistedData};
pub use transfer::{TransferMap, TransferTable};
pub use view::{BlockView, ColumnView};
