//! The WAL manager.
//!
//! Segments are files named by the first LSN they contain. Appends go to
//! the active (newest) segment and rotate at the configured size;
//! truncation deletes whole segments whose records are all covered by a
//! checkpoint. Replay scans segments in LSN order and stops a segment at
//! the first invalid frame.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use strata_common::types::Lsn;

use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::record::{RecordFlags, RecordKind, WalRecord};

const SEGMENT_SUFFIX: &str = ".wal";

/// WAL statistics.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Total records appended.
    pub records_appended: AtomicU64,
    /// Total bytes appended.
    pub bytes_appended: AtomicU64,
    /// Number of fsyncs.
    pub syncs: AtomicU64,
    /// Number of segment rotations.
    pub rotations: AtomicU64,
    /// Number of segments deleted by truncation.
    pub segments_truncated: AtomicU64,
}

struct Segment {
    first_lsn: Lsn,
    path: PathBuf,
}

struct WalInner {
    segments: Vec<Segment>,
    active: fs::File,
    active_len: u64,
    next_lsn: Lsn,
}

/// The write-ahead log.
pub struct Wal {
    config: WalConfig,
    inner: Mutex<WalInner>,
    stats: WalStats,
    closed: AtomicBool,
}

impl Wal {
    /// Opens the WAL in `config.dir`, creating it if empty and recovering
    /// the next LSN from existing segments.
    pub fn open(config: WalConfig) -> WalResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let mut segments = Self::scan_segments(&config)?;
        let (next_lsn, valid_len) = match segments.last() {
            Some(last) => {
                let raw = fs::read(&last.path)?;
                let total = raw.len();
                let mut buf = Bytes::from(raw);
                let mut max = Lsn::new(last.first_lsn.as_u64().saturating_sub(1));
                while let Some(rec) = WalRecord::decode(&mut buf) {
                    max = rec.lsn;
                }
                (max.next(), (total - buf.len()) as u64)
            }
            None => (Lsn::FIRST, 0),
        };

        let last_path = segments.last().map(|s| s.path.clone());
        let (active, active_len) = match last_path {
            Some(path) => {
                // Drop any partially-written tail so new appends stay
                // readable.
                let file = fs::OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_data()?;
                drop(file);
                let file = fs::OpenOptions::new().append(true).open(&path)?;
                (file, valid_len)
            }
            None => {
                let segment = Self::segment_path(&config, next_lsn);
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&segment)?;
                segments.push(Segment {
                    first_lsn: next_lsn,
                    path: segment,
                });
                (file, 0)
            }
        };

        info!(
            dir = %config.dir.display(),
            segments = segments.len(),
            next_lsn = %next_lsn,
            "wal opened"
        );

        Ok(Self {
            config,
            inner: Mutex::new(WalInner {
                segments,
                active,
                active_len,
                next_lsn,
            }),
            stats: WalStats::default(),
            closed: AtomicBool::new(false),
        })
    }

    fn segment_path(config: &WalConfig, first_lsn: Lsn) -> PathBuf {
        config
            .dir
            .join(format!("{:020}{}", first_lsn.as_u64(), SEGMENT_SUFFIX))
    }

    fn scan_segments(config: &WalConfig) -> WalResult<Vec<Segment>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&config.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(SEGMENT_SUFFIX) {
                if let Ok(first) = stem.parse::<u64>() {
                    segments.push(Segment {
                        first_lsn: Lsn::new(first),
                        path: entry.path(),
                    });
                }
            }
        }
        segments.sort_by_key(|s| s.first_lsn);
        Ok(segments)
    }

    /// Returns the next LSN that will be assigned.
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Appends a record and fsyncs (per configuration) before returning.
    pub fn append(
        &self,
        kind: RecordKind,
        flags: RecordFlags,
        payload: Bytes,
    ) -> WalResult<Lsn> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.next_lsn = lsn.next();

        let frame = WalRecord::new(lsn, kind, flags, payload).encode();
        inner.active.write_all(&frame)?;
        if self.config.sync_on_append {
            inner.active.sync_data()?;
            self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        }
        inner.active_len += frame.len() as u64;
        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_appended
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        if inner.active_len >= self.config.segment_size {
            self.rotate_locked(&mut inner)?;
        }
        Ok(lsn)
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> WalResult<()> {
        inner.active.sync_data()?;
        let first_lsn = inner.next_lsn;
        let path = Self::segment_path(&self.config, first_lsn);
        inner.active = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        inner.active_len = 0;
        inner.segments.push(Segment { first_lsn, path });
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        debug!(first_lsn = %first_lsn, "wal segment rotated");
        Ok(())
    }

    /// Forces an fsync of the active segment.
    pub fn sync(&self) -> WalResult<()> {
        let inner = self.inner.lock();
        inner.active.sync_data()?;
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replays all records with `lsn >= from`, in order, to `callback`.
    /// A partially-written tail is ignored.
    pub fn replay(
        &self,
        from: Lsn,
        mut callback: impl FnMut(&WalRecord) -> WalResult<()>,
    ) -> WalResult<()> {
        let paths: Vec<(Lsn, PathBuf)> = {
            let inner = self.inner.lock();
            inner
                .segments
                .iter()
                .map(|s| (s.first_lsn, s.path.clone()))
                .collect()
        };
        for (i, (_, path)) in paths.iter().enumerate() {
            // Skip segments entirely below `from`.
            if let Some((next_first, _)) = paths.get(i + 1) {
                if next_first.as_u64() <= from.as_u64() {
                    continue;
                }
            }
            let mut buf = Bytes::from(fs::read(path)?);
            while let Some(rec) = WalRecord::decode(&mut buf) {
                if rec.lsn >= from {
                    callback(&rec)?;
                }
            }
        }
        Ok(())
    }

    /// Durably drops every segment whose records all have `lsn <= upto`.
    /// The active segment is never deleted.
    pub fn truncate_to(&self, upto: Lsn) -> WalResult<()> {
        let mut inner = self.inner.lock();
        let mut removed = 0u64;
        // A segment is fully covered when the next segment starts at or
        // below `upto + 1`.
        while inner.segments.len() > 1 {
            let next_first = inner.segments[1].first_lsn;
            if next_first.as_u64() <= upto.as_u64() + 1 {
                let victim = inner.segments.remove(0);
                fs::remove_file(&victim.path)?;
                removed += 1;
            } else {
                break;
            }
        }
        if removed > 0 {
            self.stats
                .segments_truncated
                .fetch_add(removed, Ordering::Relaxed);
            info!(upto = %upto, removed, "wal truncated");
        }
        Ok(())
    }

    /// Returns statistics.
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Closes the WAL after a final sync.
    pub fn close(&self) -> WalResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.lock().active.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> WalConfig {
        let mut cfg = WalConfig::new(dir.path());
        cfg.segment_size = 4096;
        cfg
    }

    fn payload(i: u64) -> Bytes {
        Bytes::from(format!("payload-{i}").into_bytes())
    }

    #[test]
    fn test_append_assigns_lsns() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(&tmp)).unwrap();
        let a = wal
            .append(RecordKind::CatalogOp, RecordFlags::empty(), payload(1))
            .unwrap();
        let b = wal
            .append(RecordKind::BlockMutation, RecordFlags::empty(), payload(2))
            .unwrap();
        assert_eq!(a, Lsn::new(1));
        assert_eq!(b, Lsn::new(2));
    }

    #[test]
    fn test_replay_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let wal = Wal::open(test_config(&tmp)).unwrap();
            for i in 0..10 {
                wal.append(RecordKind::BlockMutation, RecordFlags::empty(), payload(i))
                    .unwrap();
            }
            wal.close().unwrap();
        }

        let wal = Wal::open(test_config(&tmp)).unwrap();
        assert_eq!(wal.next_lsn(), Lsn::new(11));

        let mut seen = Vec::new();
        wal.replay(Lsn::new(4), |rec| {
            seen.push(rec.lsn.as_u64());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, (4..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_rotation_and_truncate() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(&tmp)).unwrap();
        // Large payloads force several rotations past the 4 KiB threshold.
        let big = Bytes::from(vec![7u8; 1024]);
        let mut last = Lsn::INVALID;
        for _ in 0..20 {
            last = wal
                .append(RecordKind::BlockMutation, RecordFlags::empty(), big.clone())
                .unwrap();
        }
        assert!(wal.stats().rotations.load(Ordering::Relaxed) > 0);

        wal.truncate_to(last).unwrap();
        assert!(wal.stats().segments_truncated.load(Ordering::Relaxed) > 0);

        // Records after the truncation point survive.
        let next = wal
            .append(RecordKind::BlockMutation, RecordFlags::empty(), payload(99))
            .unwrap();
        let mut seen = Vec::new();
        wal.replay(next, |rec| {
            seen.push(rec.lsn);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![next]);
    }

    #[test]
    fn test_partial_tail_ignored_on_replay() {
        let tmp = TempDir::new().unwrap();
        let path;
        {
            let wal = Wal::open(test_config(&tmp)).unwrap();
            wal.append(RecordKind::CatalogOp, RecordFlags::empty(), payload(1))
                .unwrap();
            wal.append(RecordKind::CatalogOp, RecordFlags::empty(), payload(2))
                .unwrap();
            path = tmp.path().join(format!("{:020}.wal", 1));
            wal.close().unwrap();
        }

        // Simulate a torn write by appending garbage to the segment.
        {
            use std::io::Write;
            let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        }

        let wal = Wal::open(test_config(&tmp)).unwrap();
        let mut count = 0;
        wal.replay(Lsn::FIRST, |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        // The torn tail does not consume an LSN.
        assert_eq!(wal.next_lsn(), Lsn::new(3));
    }

    #[test]
    fn test_closed_wal_rejects_appends() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(&tmp)).unwrap();
        wal.close().unwrap();
        assert!(matches!(
            wal.append(RecordKind::CatalogOp, RecordFlags::empty(), payload(1)),
            Err(WalError::Closed)
        ));
    }
}
