//! # FileStore
//!
//! Content-addressed ingestion shared by every importer. Each payload is
//! hashed, checked against the catalog, written to the media root at most
//! once and recorded exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ma_core::error::{AppError, Result};
use ma_core::hashing::{self, ContentHasher};
use ma_core::models::{ContentHash, FilePatch, FileSource, ImportMode, TrackedFile};
use ma_core::traits::{Fetcher, FileRepo, MediaStore};
use ma_core::ExtensionResolver;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// Leading bytes compared when a hash is seen again, and the most that
/// extension sniffing ever reads from a local file.
pub const SIGNATURE_LEN: usize = 64 * 1024;

/// Optional knobs for [`FileStore::download_and_ingest`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Name to resolve the extension from instead of the URL's last segment.
    pub filename_override: Option<String>,
    /// URL to record (and short-circuit on) instead of the fetched one.
    pub saved_url_override: Option<String>,
    pub source: Option<FileSource>,
}

/// Outcome of [`FileStore::recover_orphans`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: Vec<ContentHash>,
    pub temp_files_removed: usize,
}

/// What an ingest call knows about the payload besides its hash.
struct Incoming<'a> {
    filename: Option<&'a str>,
    source: Option<FileSource>,
    origin_url: Option<&'a str>,
    size: u64,
    signature: &'a [u8],
}

/// How to take back bytes placed in the media root when the catalog insert
/// fails.
enum Undo<'a> {
    Remove,
    MoveBack(&'a Path),
}

pub struct FileStore {
    repo: Arc<dyn FileRepo>,
    media: Arc<dyn MediaStore>,
    hasher: Arc<dyn ContentHasher>,
    resolver: ExtensionResolver,
}

impl FileStore {
    pub fn new(
        repo: Arc<dyn FileRepo>,
        media: Arc<dyn MediaStore>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            repo,
            media,
            hasher,
            resolver: ExtensionResolver::new(),
        }
    }

    pub fn hasher(&self) -> Arc<dyn ContentHasher> {
        Arc::clone(&self.hasher)
    }

    /// Stores an in-memory payload. Returns the record and whether the
    /// content was already tracked.
    pub async fn ingest_from_buffer(
        &self,
        buffer: &[u8],
        original_filename: &str,
        source: Option<FileSource>,
        origin_url: Option<&str>,
    ) -> Result<(TrackedFile, bool)> {
        let filename = Some(original_filename).filter(|name| !name.is_empty());
        if buffer.is_empty() {
            return Err(AppError::unreadable(
                filename.unwrap_or("<buffer>"),
                "empty buffer",
            ));
        }

        let hash = hashing::hash_bytes(self.hasher.as_ref(), buffer);
        let incoming = Incoming {
            filename,
            source,
            origin_url,
            size: buffer.len() as u64,
            signature: &buffer[..buffer.len().min(SIGNATURE_LEN)],
        };

        if let Some(existing) = self.repo.find_by_hash(&hash).await? {
            let file = self.accept_duplicate(existing, &incoming).await?;
            return Ok((file, true));
        }

        let extension = self.resolver.resolve(original_filename, Some(incoming.signature));
        let storage_path = self.claim_path(&hash, &extension).await?;
        self.media.write_new(&storage_path, buffer).await?;

        let record = TrackedFile::new(
            hash,
            storage_path,
            incoming.size,
            source,
            filename.map(String::from),
            origin_url.map(String::from),
        );
        self.commit(record, &incoming, Undo::Remove).await
    }

    /// Stores a file already on local disk, named after its basename.
    pub async fn ingest_from_path(
        &self,
        path: &Path,
        mode: ImportMode,
    ) -> Result<(TrackedFile, bool)> {
        self.ingest_from_path_as(path, mode, None, None).await
    }

    /// Like [`ingest_from_path`](Self::ingest_from_path), with an importer
    /// source and optionally a hash already computed over the whole file.
    ///
    /// With [`ImportMode::Move`] the source is relocated only when the content
    /// is new; duplicates leave it in place for the caller to deal with.
    pub async fn ingest_from_path_as(
        &self,
        path: &Path,
        mode: ImportMode,
        source: Option<FileSource>,
        known_hash: Option<ContentHash>,
    ) -> Result<(TrackedFile, bool)> {
        let display = path.display().to_string();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| AppError::unreadable(&display, e))?;
        if !meta.is_file() {
            return Err(AppError::unreadable(&display, "not a regular file"));
        }
        if meta.len() == 0 {
            return Err(AppError::unreadable(&display, "empty file"));
        }
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from);

        let hash = match known_hash {
            Some(hash) => hash,
            None => hashing::hash_file(self.hasher.as_ref(), path).await?,
        };
        let signature = read_signature(path).await?;
        let incoming = Incoming {
            filename: filename.as_deref(),
            source,
            origin_url: None,
            size: meta.len(),
            signature: &signature,
        };

        if let Some(existing) = self.repo.find_by_hash(&hash).await? {
            let file = self.accept_duplicate(existing, &incoming).await?;
            return Ok((file, true));
        }

        let extension = self
            .resolver
            .resolve(filename.as_deref().unwrap_or_default(), Some(&signature));
        let storage_path = self.claim_path(&hash, &extension).await?;
        self.media.import_new(&storage_path, path, mode).await?;

        let record = TrackedFile::new(
            hash,
            storage_path,
            incoming.size,
            source,
            filename.clone(),
            None,
        );
        let undo = match mode {
            ImportMode::Copy => Undo::Remove,
            ImportMode::Move => Undo::MoveBack(path),
        };
        self.commit(record, &incoming, undo).await
    }

    /// Fetches `url` unless a record already carries it as its origin URL.
    ///
    /// The short-circuit is keyed on the saved URL, not the content hash, so
    /// known URLs are never downloaded twice. Fetch failures surface as
    /// `AppError::FetchFailed`; retrying is the caller's business.
    ///
    /// Only the URL recorded on a record is matched. Other URLs serving the
    /// same bytes are fetched again and then resolve to the existing record
    /// by hash.
    pub async fn download_and_ingest(
        &self,
        url: &str,
        fetcher: &dyn Fetcher,
        options: &DownloadOptions,
    ) -> Result<(TrackedFile, bool)> {
        let saved_url = options.saved_url_override.as_deref().unwrap_or(url);
        if let Some(existing) = self.repo.find_by_url(saved_url).await? {
            debug!(url = saved_url, hash = %existing.content_hash, "URL already archived");
            return Ok((existing, true));
        }

        info!(url, "Downloading");
        let body = fetcher.fetch(url).await.map_err(|e| match e {
            AppError::FetchFailed { .. } => e,
            other => AppError::fetch_failed(url, other),
        })?;
        if body.is_empty() {
            return Err(AppError::fetch_failed(url, "empty response body"));
        }

        let filename = options
            .filename_override
            .clone()
            .unwrap_or_else(|| filename_from_url(url));
        self.ingest_from_buffer(&body, &filename, options.source, Some(saved_url))
            .await
    }

    /// Adopts a hash-named file that has no catalog row, e.g. after a crash
    /// between the disk write and the insert. Returns the existing record if
    /// the hash is already tracked.
    pub async fn recover_stub(
        &self,
        hash: ContentHash,
        storage_path: &str,
    ) -> Result<TrackedFile> {
        if let Some(existing) = self.repo.find_by_hash(&hash).await? {
            debug!(%hash, path = storage_path, "Hash already tracked, nothing to recover");
            return Ok(existing);
        }
        let size = self
            .media
            .size(storage_path)
            .await?
            .ok_or_else(|| AppError::unreadable(storage_path, "not present in media root"))?;

        let stub = TrackedFile::stub(hash, storage_path.to_string(), size);
        self.repo.insert_file(&stub).await?;
        info!(hash = %stub.content_hash, path = storage_path, "Recovered stub record");
        Ok(stub)
    }

    /// Consistency repair: creates stubs for every orphaned file in the media
    /// root and clears temp files left by interrupted writes.
    pub async fn recover_orphans(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            temp_files_removed: self.media.cleanup_temp_files().await?,
            ..Default::default()
        };

        for object in self.media.scan().await? {
            report.scanned += 1;
            match self.repo.find_by_hash(&object.content_hash).await? {
                None => {
                    self.recover_stub(object.content_hash.clone(), &object.storage_path)
                        .await?;
                    report.recovered.push(object.content_hash);
                }
                Some(existing) if existing.storage_path != object.storage_path => {
                    warn!(
                        hash = %object.content_hash,
                        tracked = %existing.storage_path,
                        extra = %object.storage_path,
                        "Second copy of tracked content in media root"
                    );
                }
                Some(_) => {}
            }
        }

        info!(
            scanned = report.scanned,
            recovered = report.recovered.len(),
            temp_files_removed = report.temp_files_removed,
            "Recovery pass complete"
        );
        Ok(report)
    }

    /// Re-hashes the stored bytes and reports whether they still match.
    pub async fn verify(&self, file: &TrackedFile) -> Result<bool> {
        let path = self.absolute_path(file);
        let actual = hashing::hash_file(self.hasher.as_ref(), &path).await?;
        if actual != file.content_hash {
            warn!(
                expected = %file.content_hash,
                %actual,
                path = %path.display(),
                "Stored file does not match its hash"
            );
        }
        Ok(actual == file.content_hash)
    }

    pub async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<TrackedFile>> {
        self.repo.find_by_hash(hash).await
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<TrackedFile>> {
        self.repo.find_by_url(url).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.repo.count_files().await
    }

    pub async fn list(&self) -> Result<Vec<TrackedFile>> {
        self.repo.list_files().await
    }

    pub fn absolute_path(&self, file: &TrackedFile) -> PathBuf {
        self.media.absolute_path(&file.storage_path)
    }

    /// Picks the storage path for new content. Bytes for this hash already in
    /// the media root, under any extension, mean the store is inconsistent.
    async fn claim_path(&self, hash: &ContentHash, extension: &str) -> Result<String> {
        if let Some(found) = self.media.locate(hash).await? {
            error!(%hash, path = %found, "Untracked file already stored for new content");
            return Err(AppError::OrphanedFile(found));
        }
        Ok(self.media.relative_path(hash, extension))
    }

    async fn commit(
        &self,
        record: TrackedFile,
        incoming: &Incoming<'_>,
        undo: Undo<'_>,
    ) -> Result<(TrackedFile, bool)> {
        let err = match self.repo.insert_file(&record).await {
            Ok(()) => {
                info!(
                    hash = %record.content_hash,
                    path = %record.storage_path,
                    source = ?record.source,
                    "Stored new file"
                );
                return Ok((record, false));
            }
            Err(err) => err,
        };

        // Another writer may have recorded the same hash first.
        if matches!(err, AppError::Conflict(_)) {
            if let Some(winner) = self.repo.find_by_hash(&record.content_hash).await? {
                if winner.storage_path != record.storage_path {
                    self.undo(&record.storage_path, undo).await;
                }
                let winner = self.accept_duplicate(winner, incoming).await?;
                return Ok((winner, true));
            }
        }

        self.undo(&record.storage_path, undo).await;
        Err(err)
    }

    async fn undo(&self, storage_path: &str, undo: Undo<'_>) {
        let result = match undo {
            Undo::Remove => self.media.remove(storage_path).await,
            Undo::MoveBack(original) => self.media.export(storage_path, original).await,
        };
        if let Err(e) = result {
            error!(path = storage_path, error = %e, "Failed to roll back stored file");
        }
    }

    async fn accept_duplicate(
        &self,
        existing: TrackedFile,
        incoming: &Incoming<'_>,
    ) -> Result<TrackedFile> {
        self.check_signature(&existing, incoming).await?;
        debug!(
            hash = %existing.content_hash,
            path = %existing.storage_path,
            filename = ?incoming.filename,
            "Repeated hash"
        );
        self.backfill(existing, incoming).await
    }

    /// Same hash must mean same size and same leading bytes.
    async fn check_signature(&self, existing: &TrackedFile, incoming: &Incoming<'_>) -> Result<()> {
        let collision = || AppError::HashCollision {
            hash: existing.content_hash.to_string(),
            stored_size: existing.size_bytes,
            incoming_size: incoming.size,
        };

        if existing.size_bytes != incoming.size {
            return Err(collision());
        }
        match self.media.read_prefix(&existing.storage_path, SIGNATURE_LEN).await? {
            Some(stored) if stored != incoming.signature => Err(collision()),
            Some(_) => Ok(()),
            None => {
                warn!(
                    hash = %existing.content_hash,
                    path = %existing.storage_path,
                    "Stored file missing, cannot compare content"
                );
                Ok(())
            }
        }
    }

    /// Stubs take all incoming metadata. Populated records keep theirs (first
    /// write wins) but still gain an origin URL nobody else owns.
    async fn backfill(
        &self,
        existing: TrackedFile,
        incoming: &Incoming<'_>,
    ) -> Result<TrackedFile> {
        let mut patch = FilePatch::default();
        if existing.original_filename.is_none() {
            patch.original_filename = incoming.filename.map(String::from);
            if existing.source.is_none() {
                patch.source = incoming.source;
            }
        }
        if let (None, Some(url)) = (&existing.origin_url, incoming.origin_url) {
            match self.repo.find_by_url(url).await? {
                None => patch.origin_url = Some(url.to_string()),
                Some(owner) => warn!(
                    url,
                    owner = %owner.content_hash,
                    "URL already recorded for other content, not backfilling"
                ),
            }
        }

        if patch.is_empty() {
            return Ok(existing);
        }
        info!(hash = %existing.content_hash, ?patch, "Backfilling metadata");
        self.repo.update_metadata(existing.id, &patch).await
    }
}

async fn read_signature(path: &Path) -> Result<Vec<u8>> {
    let unreadable = |e: std::io::Error| AppError::unreadable(path.display().to_string(), e);
    let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut signature = Vec::with_capacity(SIGNATURE_LEN);
    file.take(SIGNATURE_LEN as u64)
        .read_to_end(&mut signature)
        .await
        .map_err(unreadable)?;
    Ok(signature)
}

/// Last path segment of a URL, or "" when there is none.
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(String::from))
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ma_core::{HashState, MockFetcher, Sha256Hasher};
    use ma_db_sqlite::SqliteCatalog;
    use ma_storage_local::LocalMediaStore;
    use tempfile::TempDir;
    use uuid::Uuid;

    const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\x01 jpeg body";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR png body";

    struct Harness {
        dir: TempDir,
        store: FileStore,
        media: Arc<LocalMediaStore>,
        repo: Arc<SqliteCatalog>,
    }

    async fn harness_with(hasher: Arc<dyn ContentHasher>) -> Harness {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(LocalMediaStore::open(dir.path().join("media")).await.unwrap());
        let repo = Arc::new(SqliteCatalog::new("sqlite::memory:").await.unwrap());
        let store = FileStore::new(repo.clone(), media.clone(), hasher);
        Harness { dir, store, media, repo }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(Sha256Hasher)).await
    }

    const FIXED: &str = "f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1";

    /// Hashes everything to the same digest.
    struct FixedHasher;
    struct FixedState;

    impl HashState for FixedState {
        fn update(&mut self, _chunk: &[u8]) {}
        fn finish(self: Box<Self>) -> ContentHash {
            ContentHash::parse(FIXED).unwrap()
        }
    }

    impl ContentHasher for FixedHasher {
        fn algorithm(&self) -> &'static str {
            "fixed"
        }
        fn begin(&self) -> Box<dyn HashState> {
            Box::new(FixedState)
        }
    }

    #[tokio::test]
    async fn test_buffer_ingest_is_idempotent() {
        let h = harness().await;

        let (first, existing) = h
            .store
            .ingest_from_buffer(PNG, "a.png", Some(FileSource::Twitter), None)
            .await
            .unwrap();
        assert!(!existing);

        let (second, existing) = h
            .store
            .ingest_from_buffer(PNG, "a.png", Some(FileSource::Twitter), None)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(second.id, first.id);
        assert_eq!(second.content_hash, first.content_hash);
        assert_eq!(second.storage_path, first.storage_path);

        assert_eq!(h.store.count().await.unwrap(), 1);
        assert_eq!(h.media.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_jpeg_without_extension() {
        let h = harness().await;

        let (file, existing) = h
            .store
            .ingest_from_buffer(JPEG, "photo", Some(FileSource::Twitter), None)
            .await
            .unwrap();
        assert!(!existing);
        assert_eq!(file.extension(), ".jpg");
        assert_eq!(
            file.storage_path,
            format!("{}/{}.jpg", file.content_hash.shard(), file.content_hash)
        );
        assert_eq!(std::fs::read(h.store.absolute_path(&file)).unwrap(), JPEG);

        let (again, existing) = h
            .store
            .ingest_from_buffer(JPEG, "renamed.jpg", Some(FileSource::DeviantArt), None)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(again.original_filename.as_deref(), Some("photo"));
        assert_eq!(again.source, Some(FileSource::Twitter));
    }

    #[tokio::test]
    async fn test_extension_corrected_from_magic_bytes() {
        let h = harness().await;
        let (file, _) = h
            .store
            .ingest_from_buffer(PNG, "mislabeled.jpg", None, None)
            .await
            .unwrap();
        assert_eq!(file.extension(), ".png");

        let stored = std::fs::read(h.store.absolute_path(&file)).unwrap();
        assert_eq!(
            ExtensionResolver.resolve(&file.storage_path, Some(&stored)),
            ".png"
        );
    }

    #[tokio::test]
    async fn test_empty_buffer_is_unreadable() {
        let h = harness().await;
        let err = h
            .store
            .ingest_from_buffer(b"", "nothing.png", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnreadableSource { .. }));
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hash_collision_with_different_size() {
        let h = harness_with(Arc::new(FixedHasher)).await;
        let (first, _) = h
            .store
            .ingest_from_buffer(b"first payload", "one.bin", None, None)
            .await
            .unwrap();

        let err = h
            .store
            .ingest_from_buffer(b"second, longer payload", "two.bin", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HashCollision { .. }));
        assert!(err.is_fatal());

        assert_eq!(std::fs::read(h.store.absolute_path(&first)).unwrap(), b"first payload");
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_collision_with_same_size() {
        let h = harness_with(Arc::new(FixedHasher)).await;
        let (first, _) = h
            .store
            .ingest_from_buffer(b"aaaa", "one.bin", None, None)
            .await
            .unwrap();

        let err = h
            .store
            .ingest_from_buffer(b"bbbb", "two.bin", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HashCollision { .. }));
        assert_eq!(std::fs::read(h.store.absolute_path(&first)).unwrap(), b"aaaa");
    }

    #[tokio::test]
    async fn test_download_short_circuits_known_url() {
        let h = harness().await;
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(JPEG)));

        let url = "https://pbs.example.com/media/avatar";
        let options = DownloadOptions {
            source: Some(FileSource::Twitter),
            ..Default::default()
        };
        let (first, existing) = h.store.download_and_ingest(url, &fetcher, &options).await.unwrap();
        assert!(!existing);
        assert_eq!(first.origin_url.as_deref(), Some(url));
        assert_eq!(first.original_filename.as_deref(), Some("avatar"));
        assert_eq!(first.extension(), ".jpg");

        let (second, existing) = h
            .store
            .download_and_ingest(url, &fetcher, &options)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_download_uses_saved_url_override() {
        let h = harness().await;
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.ends_with("signed?token=1"))
            .times(1)
            .returning(|_| Ok(Bytes::from_static(PNG)));

        let options = DownloadOptions {
            filename_override: Some("deviation.png".into()),
            saved_url_override: Some("https://example.com/art/42".into()),
            source: Some(FileSource::DeviantArt),
        };
        let (file, _) = h
            .store
            .download_and_ingest("https://cdn.example.com/signed?token=1", &fetcher, &options)
            .await
            .unwrap();
        assert_eq!(file.origin_url.as_deref(), Some("https://example.com/art/42"));
        assert_eq!(file.original_filename.as_deref(), Some("deviation.png"));

        // A fresh signed URL for the same deviation is not fetched again.
        let (again, existing) = h
            .store
            .download_and_ingest("https://cdn.example.com/signed?token=2", &fetcher, &options)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(again.id, file.id);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_existing() {
        let h = harness().await;
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|url| Err(AppError::fetch_failed(url, "HTTP 404")));

        let err = h
            .store
            .download_and_ingest(
                "https://example.com/gone.jpg",
                &fetcher,
                &DownloadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FetchFailed { .. }));
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetcher_errors_are_wrapped_as_fetch_failed() {
        let h = harness().await;
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(AppError::Internal("socket closed".into())));

        let err = h
            .store
            .download_and_ingest("https://example.com/a.jpg", &fetcher, &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn test_stub_is_backfilled() {
        let h = harness().await;
        let hash = hashing::hash_bytes(&Sha256Hasher, PNG);
        let storage_path = h.media.relative_path(&hash, ".png");
        h.media.write_new(&storage_path, PNG).await.unwrap();

        let stub = h.store.recover_stub(hash.clone(), &storage_path).await.unwrap();
        assert!(stub.is_stub());
        assert_eq!(stub.size_bytes, PNG.len() as u64);

        let (file, existing) = h
            .store
            .ingest_from_buffer(
                PNG,
                "found.png",
                Some(FileSource::Shotwell),
                Some("https://example.com/found.png"),
            )
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(file.id, stub.id);
        assert_eq!(file.original_filename.as_deref(), Some("found.png"));
        assert_eq!(file.origin_url.as_deref(), Some("https://example.com/found.png"));
        assert_eq!(file.source, Some(FileSource::Shotwell));
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_origin_url_backfilled_on_populated_record() {
        let h = harness().await;
        let (first, _) = h.store.ingest_from_buffer(PNG, "a.png", None, None).await.unwrap();

        let (second, existing) = h
            .store
            .ingest_from_buffer(PNG, "b.png", None, Some("https://example.com/b.png"))
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(second.id, first.id);
        assert_eq!(second.original_filename.as_deref(), Some("a.png"));
        assert_eq!(second.origin_url.as_deref(), Some("https://example.com/b.png"));
    }

    #[tokio::test]
    async fn test_orphaned_file_blocks_ingest_until_recovered() {
        let h = harness().await;
        let hash = hashing::hash_bytes(&Sha256Hasher, JPEG);
        let orphan = h.media.relative_path(&hash, ".jpg");
        h.media.write_new(&orphan, JPEG).await.unwrap();

        let err = h
            .store
            .ingest_from_buffer(JPEG, "photo.jpg", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OrphanedFile(_)));

        let report = h.store.recover_orphans().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.recovered, vec![hash.clone()]);

        let (file, existing) = h
            .store
            .ingest_from_buffer(JPEG, "photo.jpg", None, None)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(file.storage_path, orphan);
        assert_eq!(file.original_filename.as_deref(), Some("photo.jpg"));

        let rerun = h.store.recover_orphans().await.unwrap();
        assert!(rerun.recovered.is_empty());
    }

    #[tokio::test]
    async fn test_path_ingest_move_new_and_duplicate() {
        let h = harness().await;
        let incoming = h.dir.path().join("download.tmp");
        std::fs::write(&incoming, PNG).unwrap();

        let (file, existing) = h.store.ingest_from_path(&incoming, ImportMode::Move).await.unwrap();
        assert!(!existing);
        assert!(!incoming.exists());
        assert_eq!(file.original_filename.as_deref(), Some("download.tmp"));
        assert_eq!(file.extension(), ".png");

        std::fs::write(&incoming, PNG).unwrap();
        let (dup, existing) = h.store.ingest_from_path(&incoming, ImportMode::Move).await.unwrap();
        assert!(existing);
        assert_eq!(dup.id, file.id);
        assert!(incoming.exists());
        assert_eq!(h.media.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_path_ingest_copy_matches_buffer_hash() {
        let h = harness().await;
        let source = h.dir.path().join("clip.webm");
        let mut data = b"\x1a\x45\xdf\xa3".to_vec();
        data.extend(std::iter::repeat(9u8).take(SIGNATURE_LEN * 2));
        std::fs::write(&source, &data).unwrap();

        let (file, existing) = h.store.ingest_from_path(&source, ImportMode::Copy).await.unwrap();
        assert!(!existing);
        assert!(source.exists());
        assert_eq!(file.content_hash, hashing::hash_bytes(&Sha256Hasher, &data));
        assert_eq!(file.size_bytes, data.len() as u64);

        let (_, existing) = h
            .store
            .ingest_from_buffer(&data, "clip.webm", None, None)
            .await
            .unwrap();
        assert!(existing);
    }

    #[tokio::test]
    async fn test_path_ingest_missing_source() {
        let h = harness().await;
        let err = h
            .store
            .ingest_from_path(&h.dir.path().join("missing.jpg"), ImportMode::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnreadableSource { .. }));
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let h = harness().await;
        let (file, _) = h.store.ingest_from_buffer(PNG, "a.png", None, None).await.unwrap();
        assert!(h.store.verify(&file).await.unwrap());

        std::fs::write(h.store.absolute_path(&file), b"bitrot").unwrap();
        assert!(!h.store.verify(&file).await.unwrap());
    }

    /// Records a competing row for the same hash right before delegating,
    /// as a second writer would.
    struct RacingRepo {
        inner: Arc<SqliteCatalog>,
    }

    #[async_trait::async_trait]
    impl FileRepo for RacingRepo {
        async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<TrackedFile>> {
            self.inner.find_by_hash(hash).await
        }
        async fn find_by_url(&self, url: &str) -> Result<Option<TrackedFile>> {
            self.inner.find_by_url(url).await
        }
        async fn get_file(&self, id: Uuid) -> Result<Option<TrackedFile>> {
            self.inner.get_file(id).await
        }
        async fn insert_file(&self, file: &TrackedFile) -> Result<()> {
            let rival = TrackedFile::new(
                file.content_hash.clone(),
                file.storage_path.clone(),
                file.size_bytes,
                Some(FileSource::YouTube),
                Some("rival.png".into()),
                None,
            );
            self.inner.insert_file(&rival).await?;
            self.inner.insert_file(file).await
        }
        async fn update_metadata(&self, id: Uuid, patch: &FilePatch) -> Result<TrackedFile> {
            self.inner.update_metadata(id, patch).await
        }
        async fn count_files(&self) -> Result<u64> {
            self.inner.count_files().await
        }
        async fn list_files(&self) -> Result<Vec<TrackedFile>> {
            self.inner.list_files().await
        }
    }

    #[tokio::test]
    async fn test_lost_insert_race_returns_winner() {
        let h = harness().await;
        let racing = FileStore::new(
            Arc::new(RacingRepo { inner: h.repo.clone() }),
            h.media.clone(),
            Arc::new(Sha256Hasher),
        );

        let (file, existing) = racing
            .ingest_from_buffer(PNG, "mine.png", None, None)
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(file.original_filename.as_deref(), Some("rival.png"));
        assert_eq!(h.store.count().await.unwrap(), 1);
        assert_eq!(h.media.scan().await.unwrap().len(), 1);
        assert!(h.store.absolute_path(&file).exists());
    }

    /// Refuses every insert, as a catalog that went away mid-run would.
    struct FailingRepo {
        inner: Arc<SqliteCatalog>,
    }

    #[async_trait::async_trait]
    impl FileRepo for FailingRepo {
        async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<TrackedFile>> {
            self.inner.find_by_hash(hash).await
        }
        async fn find_by_url(&self, url: &str) -> Result<Option<TrackedFile>> {
            self.inner.find_by_url(url).await
        }
        async fn get_file(&self, id: Uuid) -> Result<Option<TrackedFile>> {
            self.inner.get_file(id).await
        }
        async fn insert_file(&self, _file: &TrackedFile) -> Result<()> {
            Err(AppError::Internal("database is locked".into()))
        }
        async fn update_metadata(&self, id: Uuid, patch: &FilePatch) -> Result<TrackedFile> {
            self.inner.update_metadata(id, patch).await
        }
        async fn count_files(&self) -> Result<u64> {
            self.inner.count_files().await
        }
        async fn list_files(&self) -> Result<Vec<TrackedFile>> {
            self.inner.list_files().await
        }
    }

    #[tokio::test]
    async fn test_failed_insert_moves_source_back() {
        let h = harness().await;
        let failing = FileStore::new(
            Arc::new(FailingRepo { inner: h.repo.clone() }),
            h.media.clone(),
            Arc::new(Sha256Hasher),
        );
        let incoming = h.dir.path().join("keep-me.png");
        std::fs::write(&incoming, PNG).unwrap();

        let err = failing
            .ingest_from_path(&incoming, ImportMode::Move)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(std::fs::read(&incoming).unwrap(), PNG);
        assert!(h.media.scan().await.unwrap().is_empty());
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_buffer_insert_removes_stored_bytes() {
        let h = harness().await;
        let failing = FileStore::new(
            Arc::new(FailingRepo { inner: h.repo.clone() }),
            h.media.clone(),
            Arc::new(Sha256Hasher),
        );

        let err = failing
            .ingest_from_buffer(JPEG, "a.jpg", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(h.media.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlong_claimed_name_stored_without_extension() {
        let h = harness().await;
        let name = format!("n.{}", "x".repeat(248));

        let (file, existing) = h
            .store
            .ingest_from_buffer(b"plain text body", &name, None, None)
            .await
            .unwrap();
        assert!(!existing);
        assert_eq!(file.extension(), "");
        assert_eq!(file.original_filename.as_deref(), Some(name.as_str()));
        assert!(h.store.absolute_path(&file).exists());
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://pbs.example.com/media/abc.jpg"), "abc.jpg");
        assert_eq!(filename_from_url("https://example.com/a/b.png?size=large"), "b.png");
        assert_eq!(filename_from_url("https://example.com/"), "");
        assert_eq!(filename_from_url("not a url"), "");
    }
}
