//! Test harness helpers.
//!
//! `TestEngine` wires an engine to an in-memory file service and a
//! throwaway WAL directory, and supports restart against the same storage
//! so recovery paths are exercised the way production restart is.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_batch::mock::{mock_batch, mock_schema};
use strata_batch::{Batch, Schema};
use strata_common::config::EngineConfig;
use strata_fs::MemFs;

use crate::db::Engine;
use crate::txn::{Relation, TxnRef};

static TEST_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

/// Engine configuration with background scheduling pushed far out, so
/// tests drive flush and checkpoint explicitly.
#[must_use]
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.checkpoint.interval = Duration::from_secs(3600);
    config.checkpoint.dirty_threshold = usize::MAX;
    config.flush_timeout = Duration::from_millis(200);
    config
}

/// A schema sized for small multi-block tests: 4 columns, int64 primary
/// key at position 3, `rows` rows per block, `blocks` blocks per segment.
#[must_use]
pub fn small_schema(name: &str, rows: u32, blocks: u16) -> Schema {
    let mut schema = mock_schema(4, 3);
    schema.name = name.to_string();
    schema.block_max_rows = rows;
    schema.segment_max_blocks = blocks;
    schema
}

/// An engine over `MemFs` and a fresh WAL directory.
pub struct TestEngine {
    engine: Option<Engine>,
    fs: Arc<MemFs>,
    wal_dir: PathBuf,
}

impl TestEngine {
    /// Creates an engine with [`test_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let wal_dir = std::env::temp_dir().join(format!(
            "strata-test-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let fs = Arc::new(MemFs::new());
        let engine = Engine::open(config, Arc::clone(&fs) as Arc<dyn strata_fs::FileService>, &wal_dir)
            .expect("test engine opens");
        Self {
            engine: Some(engine),
            fs,
            wal_dir,
        }
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine.as_ref().expect("engine is open")
    }

    /// The backing file service.
    #[must_use]
    pub fn fs(&self) -> &Arc<MemFs> {
        &self.fs
    }

    /// Closes the engine and reopens it against the same storage,
    /// exercising checkpoint + WAL replay.
    pub fn restart(&mut self) {
        self.restart_with(test_config());
    }

    /// Restart with an explicit configuration.
    pub fn restart_with(&mut self, config: EngineConfig) {
        if let Some(engine) = self.engine.take() {
            engine.close().expect("clean close");
            drop(engine);
        }
        let engine = Engine::open(
            config,
            Arc::clone(&self.fs) as Arc<dyn strata_fs::FileService>,
            &self.wal_dir,
        )
        .expect("test engine reopens");
        self.engine = Some(engine);
    }

    /// Creates `db`, a table from `schema`, appends `batch`, and commits.
    pub fn create_rel_and_append(&self, db: &str, schema: Schema, batch: &Batch) {
        let engine = self.engine();
        let txn = engine.start_txn();
        engine.create_database(&txn, db).expect("create database");
        let rel = engine
            .create_relation(&txn, db, schema)
            .expect("create relation");
        rel.append(batch).expect("append");
        engine.commit(&txn).expect("commit");
    }

    /// Starts a transaction and opens a relation in one step.
    pub fn get_relation(&self, db: &str, table: &str) -> (TxnRef, Relation) {
        let engine = self.engine();
        let txn = engine.start_txn();
        let rel = engine.relation(&txn, db, table).expect("relation resolves");
        (txn, rel)
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            let _ = engine.close();
        }
        let _ = std::fs::remove_dir_all(&self.wal_dir);
    }
}

/// A deterministic batch for `small_schema` tables.
#[must_use]
pub fn small_batch(schema: &Schema, rows: usize) -> Batch {
    mock_batch(schema, rows)
}

/// A deterministic batch whose row ordinals start at `start`.
#[must_use]
pub fn small_batch_from(schema: &Schema, start: usize, rows: usize) -> Batch {
    strata_batch::mock::mock_batch_range(schema, start, rows)
}
