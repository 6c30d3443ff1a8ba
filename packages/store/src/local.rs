//! Local filesystem store.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::checksum::ChecksumHasher;
use crate::error::StoreError;
use crate::types::{ObjectSink, ObjectStream, RemoteEntry, RemoteStore};

/// Suffix of in-progress writes. Objects carrying it are never listed.
const PARTIAL_SUFFIX: &str = ".treemirror-partial";

/// A store rooted at a local directory.
///
/// Writes are staged in a hidden sibling file and renamed into place on commit,
/// so readers never observe a half-written object.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`.
    ///
    /// The root does not need to exist yet; it is created on the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative object path, rejecting anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let valid = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !valid {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl RemoteStore for LocalStore {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let start = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix.trim_matches('/'))?
        };

        if !start.exists() {
            log::debug!("{} does not exist, listing is empty", start.display());
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in jwalk::WalkDir::new(&start)
            .skip_hidden(false)
            .follow_links(false)
            .sort(false)
        {
            let entry = entry.map_err(|e| {
                let kind = e.io_error().map_or(io::ErrorKind::Other, io::Error::kind);
                StoreError::io(prefix, io::Error::new(kind, e.to_string()))
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }

            let full_path = entry.path();
            let Ok(relative) = full_path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let metadata =
                fs::metadata(&full_path).map_err(|e| StoreError::io(&relative, e))?;
            entries.push(RemoteEntry::new(relative, metadata.len(), None));
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        log::debug!("Listed {} objects under {}", entries.len(), start.display());

        Ok(entries)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn ObjectStream>, StoreError> {
        let full_path = self.resolve(path)?;
        let file = File::open(&full_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_string(),
            },
            _ => StoreError::io(path, e),
        })?;

        Ok(Box::new(LocalStream {
            file,
            path: path.to_string(),
        }))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn ObjectSink>, StoreError> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;

        let file_name = target
            .file_name()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?
            .to_string_lossy();
        let partial = parent.join(format!(".{file_name}{PARTIAL_SUFFIX}"));
        let file = File::create(&partial).map_err(|e| StoreError::io(path, e))?;

        log::trace!("Staging {} at {}", path, partial.display());

        Ok(Box::new(LocalSink {
            file: Some(file),
            partial,
            target,
            path: path.to_string(),
            hasher: ChecksumHasher::new(),
        }))
    }

    fn metadata(&self, path: &str) -> Result<Option<RemoteEntry>, StoreError> {
        let full_path = self.resolve(path)?;
        match fs::metadata(&full_path) {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(RemoteEntry::new(path, metadata.len(), None)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

struct LocalStream {
    file: File,
    path: String,
}

impl ObjectStream for LocalStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
        }
        Ok(filled)
    }
}

struct LocalSink {
    file: Option<File>,
    partial: PathBuf,
    target: PathBuf,
    path: String,
    hasher: ChecksumHasher,
}

impl ObjectSink for LocalSink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::Permanent {
                path: self.path.clone(),
                message: "sink already closed".to_string(),
            })?;
        file.write_all(data)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.hasher.update(data);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<Option<String>, StoreError> {
        let file = self.file.take().ok_or_else(|| StoreError::Permanent {
            path: self.path.clone(),
            message: "sink already closed".to_string(),
        })?;
        file.sync_all().map_err(|e| StoreError::io(&self.path, e))?;
        drop(file);

        fs::rename(&self.partial, &self.target).map_err(|e| StoreError::io(&self.path, e))?;
        log::trace!("Committed {}", self.target.display());

        Ok(Some(std::mem::take(&mut self.hasher).finish()))
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        // Still holding the file means commit never ran.
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use tempfile::TempDir;

    fn write_object(store: &LocalStore, path: &str, data: &[u8]) {
        let mut sink = store.open_write(path).unwrap();
        sink.write_chunk(data).unwrap();
        sink.commit().unwrap();
    }

    #[test]
    fn test_list_reports_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
        fs::write(dir.path().join("a.txt"), "aaa").unwrap();
        fs::write(dir.path().join("docs/nested/b.txt"), "bb").unwrap();

        let store = LocalStore::new(dir.path());
        let entries = store.list("").unwrap();

        assert_eq!(
            entries,
            vec![
                RemoteEntry::new("a.txt", 3, None),
                RemoteEntry::new("docs/nested/b.txt", 2, None),
            ]
        );
    }

    #[test]
    fn test_list_with_prefix() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("a.txt"), "aaa").unwrap();
        fs::write(dir.path().join("docs/b.txt"), "bb").unwrap();

        let store = LocalStore::new(dir.path());
        let entries = store.list("docs").unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "docs/b.txt");
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("missing"));

        assert!(store.list("").unwrap().is_empty());
    }

    #[test]
    fn test_write_commit_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("dest"));

        let mut sink = store.open_write("x/y.bin").unwrap();
        sink.write_chunk(b"hello ").unwrap();
        sink.write_chunk(b"world").unwrap();
        let checksum = sink.commit().unwrap();

        assert_eq!(checksum.as_deref(), Some(checksum_bytes(b"hello world").as_str()));
        assert_eq!(
            store.metadata("x/y.bin").unwrap(),
            Some(RemoteEntry::new("x/y.bin", 11, None))
        );
    }

    #[test]
    fn test_dropped_sink_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        {
            let mut sink = store.open_write("torn.bin").unwrap();
            sink.write_chunk(b"partial").unwrap();
        }

        assert!(store.metadata("torn.bin").unwrap().is_none());
        assert!(store.list("").unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_replaces_existing_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        write_object(&store, "f.txt", b"old contents");
        write_object(&store, "f.txt", b"new");

        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(matches!(
            store.open_write("../escape.txt"),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.open_read("/etc/passwd"),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_open_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(matches!(
            store.open_read("nope.txt"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
