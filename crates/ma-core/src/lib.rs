//! myarchive/crates/ma-core/src/lib.rs
//!
//! The data model, error taxonomy and port definitions for MyArchive, plus
//! the two pure building blocks of ingestion: content hashing and extension
//! resolution.

pub mod error;
pub mod extension;
pub mod hashing;
pub mod models;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use extension::ExtensionResolver;
pub use hashing::{ContentHasher, HashState, Sha256Hasher};
pub use models::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_file_creation_v7() {
        let hash = hashing::hash_bytes(&Sha256Hasher, b"avatar bytes");
        let file = TrackedFile::new(
            hash.clone(),
            format!("{}/{}.png", hash.shard(), hash),
            12,
            Some(FileSource::Twitter),
            Some("avatar.png".to_string()),
            None,
        );
        assert_eq!(file.id.get_version_num(), 7);
        assert_eq!(file.content_hash, hash);
        assert!(!file.is_stub());
    }
}
