//! The file service trait and its backends.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{FsError, FsResult};
use crate::location::{Extent, Location};

/// Object storage: named immutable objects with byte-extent reads.
///
/// Objects are written once and never mutated, so readers need no
/// coordination.
pub trait FileService: Send + Sync {
    /// Writes a new object. Returns a location covering the whole object.
    fn write(&self, name: &str, payload: Bytes) -> FsResult<Location>;

    /// Reads an extent of an object. `Extent::WHOLE` reads everything.
    fn read(&self, name: &str, extent: Extent) -> FsResult<Bytes>;

    /// Deletes an object. Deleting a missing object is not an error.
    fn delete(&self, name: &str) -> FsResult<()>;

    /// Lists object names with the given prefix, sorted.
    fn list(&self, prefix: &str) -> FsResult<Vec<String>>;

    /// Returns an object's size in bytes.
    fn size(&self, name: &str) -> FsResult<u64>;

    /// Reads the extent referenced by a location.
    fn read_location(&self, location: &Location) -> FsResult<Bytes> {
        self.read(&location.object, location.extent)
    }
}

/// In-memory file service for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemFs {
    objects: DashMap<String, Bytes>,
}

impl MemFs {
    /// Creates an empty in-memory service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

fn slice_extent(payload: &Bytes, name: &str, extent: Extent) -> FsResult<Bytes> {
    let total = payload.len() as u64;
    if extent.offset > total {
        return Err(FsError::corruption(format!(
            "extent offset {} beyond object '{name}' of {total} bytes",
            extent.offset
        )));
    }
    let end = extent.end().min(total);
    Ok(payload.slice(extent.offset as usize..end as usize))
}

impl FileService for MemFs {
    fn write(&self, name: &str, payload: Bytes) -> FsResult<Location> {
        let len = payload.len() as u64;
        self.objects.insert(name.to_string(), payload);
        Ok(Location::new(name, Extent::new(0, len), 0, 0))
    }

    fn read(&self, name: &str, extent: Extent) -> FsResult<Bytes> {
        let payload = self
            .objects
            .get(name)
            .ok_or_else(|| FsError::NotFound {
                name: name.to_string(),
            })?
            .clone();
        slice_extent(&payload, name, extent)
    }

    fn delete(&self, name: &str) -> FsResult<()> {
        self.objects.remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> FsResult<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    fn size(&self, name: &str) -> FsResult<u64> {
        self.objects
            .get(name)
            .map(|b| b.len() as u64)
            .ok_or_else(|| FsError::NotFound {
                name: name.to_string(),
            })
    }
}

/// Local-disk file service rooted at a directory. Object names map to
/// relative paths under the root.
#[derive(Debug)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Creates a service rooted at `root`, creating the directory if
    /// needed.
    pub fn new(root: impl AsRef<Path>) -> FsResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FileService for LocalFs {
    fn write(&self, name: &str, payload: Bytes) -> FsResult<Location> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let len = payload.len() as u64;
        let mut file = fs::File::create(&path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        Ok(Location::new(name, Extent::new(0, len), 0, 0))
    }

    fn read(&self, name: &str, extent: Extent) -> FsResult<Bytes> {
        let path = self.path_for(name);
        let mut file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound {
                    name: name.to_string(),
                }
            } else {
                FsError::from(e)
            }
        })?;
        let total = file.metadata()?.len();
        if extent.offset > total {
            return Err(FsError::corruption(format!(
                "extent offset {} beyond object '{name}' of {total} bytes",
                extent.offset
            )));
        }
        let end = extent.end().min(total);
        let len = (end - extent.offset) as usize;
        file.seek(SeekFrom::Start(extent.offset))?;
        let mut out = vec![0u8; len];
        file.read_exact(&mut out)?;
        Ok(Bytes::from(out))
    }

    fn delete(&self, name: &str) -> FsResult<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let name = rel.to_string_lossy().replace('\\', "/");
                    if name.starts_with(prefix) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn size(&self, name: &str) -> FsResult<u64> {
        let path = self.path_for(name);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FsError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(fs: &dyn FileService) {
        let loc = fs.write("obj/a", Bytes::from_static(b"hello world")).unwrap();
        assert_eq!(loc.extent.len, 11);

        let all = fs.read("obj/a", Extent::WHOLE).unwrap();
        assert_eq!(&all[..], b"hello world");

        let mid = fs.read("obj/a", Extent::new(6, 5)).unwrap();
        assert_eq!(&mid[..], b"world");

        assert_eq!(fs.size("obj/a").unwrap(), 11);

        fs.write("obj/b", Bytes::from_static(b"x")).unwrap();
        fs.write("ckp/1", Bytes::from_static(b"y")).unwrap();
        assert_eq!(fs.list("obj/").unwrap(), vec!["obj/a", "obj/b"]);

        fs.delete("obj/a").unwrap();
        assert!(matches!(
            fs.read("obj/a", Extent::WHOLE),
            Err(FsError::NotFound { .. })
        ));
        // Deleting again is fine.
        fs.delete("obj/a").unwrap();
    }

    #[test]
    fn test_mem_fs() {
        let fs = MemFs::new();
        exercise(&fs);
    }

    #[test]
    fn test_local_fs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = LocalFs::new(tmp.path()).unwrap();
        exercise(&fs);
    }

    #[test]
    fn test_read_past_end_clamped() {
        let fs = MemFs::new();
        fs.write("o", Bytes::from_static(b"abc")).unwrap();
        let out = fs.read("o", Extent::new(1, 100)).unwrap();
        assert_eq!(&out[..], b"bc");
    }
}
