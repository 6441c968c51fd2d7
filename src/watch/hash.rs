// src/watch/hash.rs

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

/// blake3 digest of a file together with the number of bytes hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub hex: String,
    pub len: u64,
}

/// Hash the file at `path` in one streaming pass.
///
/// `len` lets callers detect a file that grew while it was being read.
pub fn digest_file(path: &Path) -> Result<ContentDigest> {
    let file = File::open(path).with_context(|| format!("opening {path:?} for hashing"))?;
    let mut hasher = Hasher::new();
    hasher
        .update_reader(BufReader::new(file))
        .with_context(|| format!("reading {path:?} for hashing"))?;
    Ok(ContentDigest {
        hex: hasher.finalize().to_hex().to_string(),
        len: hasher.count(),
    })
}
