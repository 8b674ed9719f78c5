/*!
 * Byte oriented blob storage.
 *
 * Catalogs and checkpoint logs are written through the [BlobStorage] trait so the core never
 * cares whether the bytes end up on a local disk, an FTP server, or in object storage. Two
 * backends ship with the crate, a directory on the local file system and an in-memory map.
 */
use crate::{GoesGridError, GoesGridResult};
use log::debug;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::OpenOptions,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

/**
 * The capabilities the core needs from a blob store.
 *
 * Paths are `/` separated and relative to the root of the store. Implementations must be safe
 * to share between worker threads.
 */
pub trait BlobStorage: Send + Sync {
    /// Names of the entries directly under `path`, sorted.
    fn list(&self, path: &str) -> GoesGridResult<Vec<String>>;

    /// Create a directory and any missing parents. Existing directories are not an error.
    fn mkdir(&self, path: &str) -> GoesGridResult<()>;

    /// Create or replace the blob at `path`.
    fn upload_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()>;

    /// Read the whole blob at `path`.
    fn download_bytes(&self, path: &str) -> GoesGridResult<Vec<u8>>;

    /**
     * Append to the blob at `path`, creating it if needed.
     *
     * Each call must be atomic, a concurrent reader never sees part of `data`.
     */
    fn append_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()>;
}

/// Parent portion of a `/` separated path, if any.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/*-------------------------------------------------------------------------------------------------
 *                                        Local Disk
 *-----------------------------------------------------------------------------------------------*/

/// Blobs stored as files under a root directory.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalStorage {
            root: root.as_ref().to_path_buf(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> GoesGridResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));

        // Keep everything inside the root.
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(GoesGridError::storage(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path escapes the storage root"),
            ));
        }

        Ok(self.root.join(relative))
    }

    fn create_parent(&self, full: &Path, path: &str) -> GoesGridResult<()> {
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GoesGridError::storage(path, e))?;
        }
        Ok(())
    }
}

impl BlobStorage for LocalStorage {
    fn list(&self, path: &str) -> GoesGridResult<Vec<String>> {
        let full = self.full_path(path)?;

        let mut names = Vec::new();
        for entry in walkdir::WalkDir::new(&full).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| GoesGridError::storage(path, e.into()))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();

        Ok(names)
    }

    fn mkdir(&self, path: &str) -> GoesGridResult<()> {
        let full = self.full_path(path)?;
        std::fs::create_dir_all(&full).map_err(|e| GoesGridError::storage(path, e))
    }

    fn upload_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
        let full = self.full_path(path)?;
        self.create_parent(&full, path)?;

        // Write beside the target and rename so readers never see a half written blob.
        let tmp = full.with_extension("partial");
        std::fs::write(&tmp, data).map_err(|e| GoesGridError::storage(path, e))?;
        std::fs::rename(&tmp, &full).map_err(|e| GoesGridError::storage(path, e))?;

        debug!(target: "goesgrid::storage", "uploaded {} bytes to {}", data.len(), full.display());
        Ok(())
    }

    fn download_bytes(&self, path: &str) -> GoesGridResult<Vec<u8>> {
        let full = self.full_path(path)?;
        std::fs::read(&full).map_err(|e| GoesGridError::storage(path, e))
    }

    fn append_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
        let full = self.full_path(path)?;
        self.create_parent(&full, path)?;

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| GoesGridError::storage(path, poisoned()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(|e| GoesGridError::storage(path, e))?;

        // One write on an O_APPEND handle.
        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|e| GoesGridError::storage(path, e))
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "lock poisoned by a panicked thread")
}

/*-------------------------------------------------------------------------------------------------
 *                                         In Memory
 *-----------------------------------------------------------------------------------------------*/

/// Blobs kept in memory, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    blobs: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_owned()
    }

    fn lock(&self, path: &str) -> GoesGridResult<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| GoesGridError::storage(path, poisoned()))
    }
}

impl BlobStorage for MemoryStorage {
    fn list(&self, path: &str) -> GoesGridResult<Vec<String>> {
        let dir = Self::normalize(path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let inner = self.lock(path)?;
        let names: BTreeSet<String> = inner
            .blobs
            .keys()
            .chain(inner.dirs.iter())
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();

        if names.is_empty() && !dir.is_empty() && !inner.dirs.contains(&dir) {
            return Err(GoesGridError::storage(
                path,
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }

        Ok(names.into_iter().collect())
    }

    fn mkdir(&self, path: &str) -> GoesGridResult<()> {
        let mut inner = self.lock(path)?;
        let mut current = Self::normalize(path);
        while !current.is_empty() {
            inner.dirs.insert(current.clone());
            current = parent_path(&current).unwrap_or("").to_owned();
        }
        Ok(())
    }

    fn upload_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
        let mut inner = self.lock(path)?;
        inner.blobs.insert(Self::normalize(path), data.to_vec());
        Ok(())
    }

    fn download_bytes(&self, path: &str) -> GoesGridResult<Vec<u8>> {
        let inner = self.lock(path)?;
        inner
            .blobs
            .get(&Self::normalize(path))
            .cloned()
            .ok_or_else(|| GoesGridError::storage(path, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn append_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
        let mut inner = self.lock(path)?;
        inner
            .blobs
            .entry(Self::normalize(path))
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exercise(store: &dyn BlobStorage) {
        store.mkdir("logs/old").unwrap();
        store.upload_bytes(b"{}", "catalog/areas.json").unwrap();
        store.upload_bytes(b"[1]", "catalog/areas.json").unwrap();
        assert_eq!(store.download_bytes("catalog/areas.json").unwrap(), b"[1]");

        store.append_bytes(b"# INIT\n", "logs/range.log").unwrap();
        store.append_bytes(b"2020-06-01\n", "logs/range.log").unwrap();
        assert_eq!(
            store.download_bytes("logs/range.log").unwrap(),
            b"# INIT\n2020-06-01\n"
        );

        assert_eq!(store.list("logs").unwrap(), vec!["old", "range.log"]);
        assert_eq!(store.list("").unwrap(), vec!["catalog", "logs"]);

        let err = store.download_bytes("logs/missing.log").unwrap_err();
        assert!(err.is_not_found(), "{}", err);
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        exercise(&store);

        assert!(store.download_bytes("../escape").is_err());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("a/b/c.json"), Some("a/b"));
        assert_eq!(parent_path("c.json"), None);
        assert_eq!(parent_path("/c.json"), None);
    }
}
