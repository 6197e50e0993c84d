//! Streaming SHA-256 hashing

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's bytes, read in 64 KiB chunks so large
/// rasters and point clouds are never loaded whole.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();

    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        hasher.update(chunk);
        let consumed = chunk.len();
        reader.consume(consumed);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Lowercase hex SHA-256 of a string, used for cache keys.
pub fn string_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
