//! # ma-storage-local
//! myarchive/crates/ma-plugins/ma-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Features: Content-addressable layout, directory sharding, atomic writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ma_core::error::{AppError, Result};
use ma_core::models::{ContentHash, ImportMode, StoredObject};
use ma_core::traits::MediaStore;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const TEMP_SUFFIX: &str = ".tmp";

/// Shortest file stem accepted as a content hash during scans.
const MIN_HASH_STEM: usize = 32;

pub struct LocalMediaStore {
    /// Root directory for all media (e.g., "~/.local/share/myarchive/media")
    root_path: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root_path: root }
    }

    /// Creates the root directory if needed.
    pub async fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Media root ready");
        Ok(Self::new(root))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    async fn ensure_vacant(&self, path: &Path, storage_path: &str) -> Result<()> {
        if fs::try_exists(path).await? {
            return Err(AppError::OrphanedFile(storage_path.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Renames when possible, otherwise copies through a temp file and
    /// removes the source (e.g. across filesystems).
    async fn relocate(source: &Path, target: &Path) -> std::io::Result<()> {
        match fs::rename(source, target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
            Err(e) => {
                debug!(error = %e, "Rename failed, falling back to copy");
                let temp = Self::temp_path(target);
                fs::copy(source, &temp).await?;
                fs::rename(&temp, target).await?;
                fs::remove_file(source).await
            }
        }
    }

    /// Returns the relative path if `name` looks like `{hash}{ext}`.
    fn classify(prefix: Option<&str>, name: &str) -> Option<StoredObject> {
        if name.ends_with(TEMP_SUFFIX) {
            return None;
        }
        let stem = name.split('.').next()?;
        if stem.len() < MIN_HASH_STEM {
            return None;
        }
        let content_hash = ContentHash::parse(stem).ok()?;
        if content_hash.as_str() != stem {
            return None;
        }
        let storage_path = match prefix {
            Some(shard) => format!("{shard}/{name}"),
            None => name.to_string(),
        };
        Some(StoredObject {
            content_hash,
            storage_path,
        })
    }

    /// Shard directories plus the root itself (legacy flat layout).
    async fn directories(&self) -> Result<Vec<(Option<String>, PathBuf)>> {
        if !fs::try_exists(&self.root_path).await? {
            return Ok(Vec::new());
        }
        let mut dirs = vec![(None, self.root_path.clone())];
        let mut entries = fs::read_dir(&self.root_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
                    dirs.push((Some(name.to_string()), entry.path()));
                }
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Generates a sharded path: "ab/abcdef...{ext}"
    fn relative_path(&self, hash: &ContentHash, extension: &str) -> String {
        format!("{}/{}{}", hash.shard(), hash, extension)
    }

    fn absolute_path(&self, storage_path: &str) -> PathBuf {
        storage_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root_path.clone(), |path, part| path.join(part))
    }

    async fn locate(&self, hash: &ContentHash) -> Result<Option<String>> {
        for (prefix, dir) in [
            (Some(hash.shard()), self.root_path.join(hash.shard())),
            (None, self.root_path.clone()),
        ] {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if let Some(found) = Self::classify(prefix, &name) {
                    if found.content_hash == *hash {
                        return Ok(Some(found.storage_path));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn write_new(&self, storage_path: &str, data: &[u8]) -> Result<()> {
        let target = self.absolute_path(storage_path);
        self.ensure_vacant(&target, storage_path).await?;

        // Write atomically using a temp file
        let temp = Self::temp_path(&target);
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }
        debug!(path = storage_path, bytes = data.len(), "Stored new file");
        Ok(())
    }

    async fn import_new(&self, storage_path: &str, source: &Path, mode: ImportMode) -> Result<()> {
        let target = self.absolute_path(storage_path);
        self.ensure_vacant(&target, storage_path).await?;

        let unreadable = |e: std::io::Error| AppError::unreadable(source.display().to_string(), e);
        match mode {
            ImportMode::Copy => {
                let temp = Self::temp_path(&target);
                let copied = async {
                    fs::copy(source, &temp).await?;
                    fs::rename(&temp, &target).await
                }
                .await;
                if let Err(e) = copied {
                    fs::remove_file(&temp).await.ok();
                    return Err(unreadable(e));
                }
            }
            ImportMode::Move => Self::relocate(source, &target).await.map_err(unreadable)?,
        }
        debug!(path = storage_path, source = %source.display(), ?mode, "Imported file");
        Ok(())
    }

    async fn export(&self, storage_path: &str, destination: &Path) -> Result<()> {
        let stored = self.absolute_path(storage_path);
        Self::relocate(&stored, destination).await?;
        Ok(())
    }

    async fn remove(&self, storage_path: &str) -> Result<()> {
        match fs::remove_file(self.absolute_path(storage_path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, storage_path: &str) -> Result<Option<u64>> {
        match fs::metadata(self.absolute_path(storage_path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_prefix(&self, storage_path: &str, len: usize) -> Result<Option<Vec<u8>>> {
        let file = match fs::File::open(self.absolute_path(storage_path)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut prefix = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut prefix).await?;
        Ok(Some(prefix))
    }

    async fn scan(&self) -> Result<Vec<StoredObject>> {
        let mut found = Vec::new();
        for (prefix, dir) in self.directories().await? {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                    continue;
                };
                if let Some(object) = Self::classify(prefix.as_deref(), &name) {
                    found.push(object);
                }
            }
        }
        found.sort_by(|a, b| a.storage_path.cmp(&b.storage_path));
        Ok(found)
    }

    async fn cleanup_temp_files(&self) -> Result<usize> {
        let mut cleaned = 0;
        for (_, dir) in self.directories().await? {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let is_temp = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(TEMP_SUFFIX));
                if is_temp && entry.file_type().await?.is_file() {
                    fs::remove_file(entry.path()).await?;
                    cleaned += 1;
                }
            }
        }
        if cleaned > 0 {
            info!(cleaned, "Removed stale temp files");
        }
        Ok(cleaned)
    }
}
