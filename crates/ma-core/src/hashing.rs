//! Streaming content hashing.
//!
//! Buffers and files go through the same incremental state, so a payload
//! hashes identically whether it arrives in memory or from disk.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{AppError, Result};
use crate::models::ContentHash;

/// Files are read in chunks of this size while hashing.
pub const HASH_CHUNK_SIZE: usize = 1 << 20;

/// Produces incremental hash states. Must be stable across runs and platforms.
pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> &'static str;
    fn begin(&self) -> Box<dyn HashState>;
}

pub trait HashState: Send {
    fn update(&mut self, chunk: &[u8]);
    fn finish(self: Box<Self>) -> ContentHash;
}

/// SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

struct Sha256State(Sha256);

impl HashState for Sha256State {
    fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    fn finish(self: Box<Self>) -> ContentHash {
        ContentHash::from_digest(&self.0.finalize())
    }
}

impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn begin(&self) -> Box<dyn HashState> {
        Box::new(Sha256State(Sha256::new()))
    }
}

pub fn hash_bytes(hasher: &dyn ContentHasher, data: &[u8]) -> ContentHash {
    let mut state = hasher.begin();
    for chunk in data.chunks(HASH_CHUNK_SIZE) {
        state.update(chunk);
    }
    state.finish()
}

/// Blocking variant for worker threads.
pub fn hash_reader<R: Read>(
    hasher: &dyn ContentHasher,
    mut reader: R,
) -> std::io::Result<ContentHash> {
    let mut state = hasher.begin();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        state.update(&buf[..read]);
    }
    Ok(state.finish())
}

/// Hashes a whole file without holding more than one chunk in memory.
pub async fn hash_file(hasher: &dyn ContentHasher, path: &Path) -> Result<ContentHash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::unreadable(path.display().to_string(), e))?;
    let mut state = hasher.begin();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| AppError::unreadable(path.display().to_string(), e))?;
        if read == 0 {
            break;
        }
        state.update(&buf[..read]);
    }
    Ok(state.finish())
}
