//! SHA-256 digests of downloads and module trees.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::utils::fs::find_files;

/// A content hash (lowercase SHA-256 hex digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash of the given bytes.
    pub fn compute(data: &[u8]) -> Self {
        ContentHash(hex_encode(&Sha256::digest(data)))
    }

    /// Hash of a file, read in chunks.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(ContentHash(hex_encode(&hasher.finalize())))
    }

    /// Hash of a directory tree: every file's relative path and contents, in
    /// path order. Two trees hash equal iff they hold the same files with
    /// the same bytes.
    pub fn of_dir(root: &Path) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        for file in find_files(root, &|_: &Path| true)? {
            let relative = file.strip_prefix(root).unwrap_or(&file);
            hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
            hasher.update(ContentHash::of_file(&file)?.0.as_bytes());
            hasher.update([b'\n']);
        }
        Ok(ContentHash(hex_encode(&hasher.finalize())))
    }

    /// Parses a hex digest, accepting either case.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(ContentHash(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        ContentHash::compute(data) == *self
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reads the digest from `sha256sum`-style content (`<hex>  <file>`).
/// Only the first token is considered.
pub fn parse_checksum(content: &str) -> Option<ContentHash> {
    content.split_whitespace().next().and_then(ContentHash::from_hex)
}
