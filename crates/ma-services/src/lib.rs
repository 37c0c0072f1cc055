//! myarchive/crates/ma-services/src/lib.rs
//!
//! Ingestion and tagging logic built purely on the ma-core ports. Importers
//! for each social platform go through [`FileStore`] and [`TagIndex`]; the
//! database and media root behind them are chosen by the binary.

pub mod file_store;
pub mod importer;
pub mod retry;
pub mod tag_index;

pub use file_store::{DownloadOptions, FileStore, RecoveryReport};
pub use importer::{hash_paths, import_folder, FolderImportOptions, ImportReport};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use tag_index::{TagCache, TagIndex};
