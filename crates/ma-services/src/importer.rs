//! Bulk import of a local folder tree.
//!
//! Hashing dominates the cost of a large import, so it runs on a bounded pool
//! of blocking workers. Ingestion itself stays sequential: the catalog is a
//! single writer and the store resolves duplicates in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ma_core::error::{AppError, Result};
use ma_core::hashing::{self, ContentHasher};
use ma_core::models::{ContentHash, FileSource, ImportMode};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::file_store::FileStore;
use crate::tag_index::TagIndex;

#[derive(Debug, Clone, Default)]
pub struct FolderImportOptions {
    pub mode: ImportMode,
    pub source: Option<FileSource>,
    /// Tags attached to every imported file, new or already tracked.
    pub tags: Vec<String>,
    /// Hash workers; 0 means one.
    pub workers: usize,
    /// With [`ImportMode::Move`], delete sources whose content was already
    /// archived instead of leaving them behind.
    pub delete_duplicates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub existing: usize,
    /// Skipped files and why.
    pub failed: Vec<(PathBuf, String)>,
}

/// Hashes `paths` on up to `workers` blocking threads. Results come back in
/// input order.
pub async fn hash_paths(
    hasher: Arc<dyn ContentHasher>,
    paths: Vec<PathBuf>,
    workers: usize,
) -> Vec<(PathBuf, Result<ContentHash>)> {
    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (idx, path) in paths.iter().cloned().enumerate() {
        let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
            break;
        };
        let hasher = Arc::clone(&hasher);
        set.spawn_blocking(move || {
            let _permit = permit;
            let result = std::fs::File::open(&path)
                .and_then(|file| hashing::hash_reader(hasher.as_ref(), file))
                .map_err(|e| AppError::unreadable(path.display().to_string(), e));
            (idx, result)
        });
    }

    let mut results: Vec<Option<Result<ContentHash>>> = paths.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, result)) => results[idx] = Some(result),
            Err(e) => error!(error = %e, "Hash worker failed"),
        }
    }

    paths
        .into_iter()
        .zip(results)
        .map(|(path, result)| {
            let result = result.unwrap_or_else(|| {
                Err(AppError::Internal(format!("no hash computed for {}", path.display())))
            });
            (path, result)
        })
        .collect()
}

/// Imports every regular file under `dir`. Per-file failures are recorded in
/// the report; hash collisions and orphaned files abort the run.
pub async fn import_folder(
    store: &FileStore,
    tags: &TagIndex,
    dir: &Path,
    options: &FolderImportOptions,
) -> Result<ImportReport> {
    let files = collect_files(dir).await?;
    info!(dir = %dir.display(), files = files.len(), "Importing folder");

    let mut tag_list = Vec::with_capacity(options.tags.len());
    for name in &options.tags {
        tag_list.push(tags.get_or_create(name).await?);
    }

    let mut report = ImportReport::default();
    for (path, hash) in hash_paths(store.hasher(), files, options.workers).await {
        let outcome = match hash {
            Ok(hash) => {
                store
                    .ingest_from_path_as(&path, options.mode, options.source, Some(hash))
                    .await
            }
            Err(e) => Err(e),
        };

        let file = match outcome {
            Ok((file, false)) => {
                report.added += 1;
                file
            }
            Ok((file, true)) => {
                report.existing += 1;
                if options.mode == ImportMode::Move && options.delete_duplicates {
                    discard_duplicate(&path).await;
                }
                file
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping file");
                report.failed.push((path, e.to_string()));
                continue;
            }
        };

        for tag in &tag_list {
            tags.attach(tag, &file).await?;
        }
    }

    info!(
        added = report.added,
        existing = report.existing,
        failed = report.failed.len(),
        "Folder import complete"
    );
    Ok(report)
}

async fn discard_duplicate(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed duplicate source"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove duplicate source"),
    }
}

/// Regular files under `dir`, depth first, sorted within each directory.
/// Symlinks are not followed.
async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let unreadable =
        |path: &Path, e: std::io::Error| AppError::unreadable(path.display().to_string(), e);

    let meta = tokio::fs::metadata(dir).await.map_err(|e| unreadable(dir, e))?;
    if !meta.is_dir() {
        return Err(AppError::unreadable(dir.display().to_string(), "not a directory"));
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| unreadable(&current, e))?;
        let mut dirs = Vec::new();
        let mut here = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| unreadable(&current, e))? {
            let file_type = entry.file_type().await.map_err(|e| unreadable(&entry.path(), e))?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                here.push(entry.path());
            }
        }
        here.sort();
        files.extend(here);
        dirs.sort();
        pending.extend(dirs.into_iter().rev());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_core::Sha256Hasher;
    use ma_db_sqlite::SqliteCatalog;
    use ma_storage_local::LocalMediaStore;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR png body";
    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00 gif body";

    async fn setup(dir: &TempDir) -> (FileStore, TagIndex) {
        let media = Arc::new(LocalMediaStore::open(dir.path().join("media")).await.unwrap());
        let repo = Arc::new(SqliteCatalog::new("sqlite::memory:").await.unwrap());
        (
            FileStore::new(repo.clone(), media, Arc::new(Sha256Hasher)),
            TagIndex::new(repo),
        )
    }

    fn write(path: &Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_hash_paths_keeps_order_and_reports_errors() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        write(&a, b"alpha");
        write(&b, b"beta");
        let missing = dir.path().join("missing.bin");

        let results = hash_paths(
            Arc::new(Sha256Hasher),
            vec![b.clone(), missing.clone(), a.clone()],
            2,
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, b);
        assert_eq!(
            results[0].1.as_ref().unwrap(),
            &hashing::hash_bytes(&Sha256Hasher, b"beta")
        );
        assert_eq!(results[1].0, missing);
        assert!(matches!(results[1].1, Err(AppError::UnreadableSource { .. })));
        assert_eq!(
            results[2].1.as_ref().unwrap(),
            &hashing::hash_bytes(&Sha256Hasher, b"alpha")
        );
    }

    #[tokio::test]
    async fn test_import_folder_counts_and_tags() {
        let dir = TempDir::new().unwrap();
        let (store, tags) = setup(&dir).await;
        let inbox = dir.path().join("inbox");
        write(&inbox.join("one.png"), PNG);
        write(&inbox.join("nested/two.gif"), GIF);
        write(&inbox.join("nested/copy-of-one.png"), PNG);
        write(&inbox.join("empty/.keep"), b"");

        let options = FolderImportOptions {
            source: Some(FileSource::Folder),
            tags: vec!["inbox".into()],
            workers: 2,
            ..Default::default()
        };
        let report = import_folder(&store, &tags, &inbox, &options).await.unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.existing, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, inbox.join("empty/.keep"));
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(tags.files_for_tag("inbox").await.unwrap().len(), 2);

        let again = import_folder(&store, &tags, &inbox, &options).await.unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.existing, 3);
    }

    #[tokio::test]
    async fn test_import_folder_move_with_duplicate_cleanup() {
        let dir = TempDir::new().unwrap();
        let (store, tags) = setup(&dir).await;
        let inbox = dir.path().join("inbox");
        write(&inbox.join("a.png"), PNG);
        write(&inbox.join("b.png"), PNG);

        let options = FolderImportOptions {
            mode: ImportMode::Move,
            delete_duplicates: true,
            ..Default::default()
        };
        let report = import_folder(&store, &tags, &inbox, &options).await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.existing, 1);
        assert!(!inbox.join("a.png").exists());
        assert!(!inbox.join("b.png").exists());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_folder_missing_dir() {
        let dir = TempDir::new().unwrap();
        let (store, tags) = setup(&dir).await;
        let missing = dir.path().join("nope");
        let err = import_folder(&store, &tags, &missing, &FolderImportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnreadableSource { .. }));
    }
}
