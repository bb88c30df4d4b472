//! Content hashing for integrity verification.

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Hash algorithms recorded in the manifest's `hash_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "xxh3_64")]
    Xxh3_64,
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "sha256")]
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xxh3_64 => write!(f, "xxh3_64"),
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// A finished content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Incremental hasher over any supported algorithm.
pub enum ContentHasher {
    Xxh3(Box<Xxh3>),
    Md5(md5::Context),
    Sha256(sha2::Sha256),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Xxh3_64 => Self::Xxh3(Box::new(Xxh3::new())),
            HashAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Xxh3(h) => h.update(data),
            Self::Md5(h) => h.consume(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub fn finish(self) -> ContentHash {
        match self {
            Self::Xxh3(h) => ContentHash {
                algorithm: HashAlgorithm::Xxh3_64,
                value: format!("{:016x}", h.digest()),
            },
            Self::Md5(h) => ContentHash {
                algorithm: HashAlgorithm::Md5,
                value: format!("{:x}", h.compute()),
            },
            Self::Sha256(h) => ContentHash {
                algorithm: HashAlgorithm::Sha256,
                value: format!("{:x}", h.finalize()),
            },
        }
    }
}

/// Stream a whole file through the hasher.
///
/// `keep_going` is polled between chunks; returning false stops early with
/// `Ok(None)`.
pub fn hash_file_with<F>(
    path: &Path,
    algorithm: HashAlgorithm,
    mut keep_going: F,
) -> std::io::Result<Option<ContentHash>>
where
    F: FnMut() -> bool,
{
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut hasher = ContentHasher::new(algorithm);

    loop {
        if !keep_going() {
            return Ok(None);
        }
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Some(hasher.finish()))
}

pub fn compute_file_hash(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<ContentHash> {
    hash_file_with(path, algorithm, || true).map(|hash| {
        hash.unwrap_or_else(|| ContentHasher::new(algorithm).finish())
    })
}
