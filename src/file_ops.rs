//! File operations used by the copier and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::errors::{CopyError, TransferError, TransferResult};
use crate::hashing::{ContentHash, ContentHasher, HashAlgorithm};
use crate::manifest::MANIFEST_FILENAME;

pub const PARTIAL_SUFFIX: &str = ".lastlook-partial";

/// A top-level entry of a source or destination folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified_ms: i64,
    pub is_dir: bool,
}

/// The two stat fields Smart-Resume compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Milliseconds since the Unix epoch (negative before 1970).
    pub modified_ms: i64,
    pub is_dir: bool,
}

pub fn stat_file(path: &Path) -> std::io::Result<FileStat> {
    let metadata = fs::metadata(path)?;
    Ok(FileStat {
        size: metadata.len(),
        modified_ms: metadata_to_epoch_ms(&metadata)?,
        is_dir: metadata.is_dir(),
    })
}

pub async fn stat_file_async(path: &Path) -> std::io::Result<FileStat> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(FileStat {
        size: metadata.len(),
        modified_ms: metadata_to_epoch_ms(&metadata)?,
        is_dir: metadata.is_dir(),
    })
}

pub fn metadata_to_epoch_ms(metadata: &fs::Metadata) -> std::io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    })
}

/// Paths are recorded with forward slashes regardless of platform.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Files this engine writes next to the media: staging copies and the journal.
fn is_engine_file(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
        || name == MANIFEST_FILENAME
        || name
            .strip_prefix(MANIFEST_FILENAME)
            .is_some_and(|rest| rest == ".tmp")
}

/// List the immediate children of `dir`, skipping the engine's own files.
pub fn list_entries(dir: &Path) -> TransferResult<Vec<FileInfo>> {
    if !dir.is_dir() {
        return Err(TransferError::InvalidPath(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_engine_file(&name) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(FileInfo {
            name,
            size: metadata.len(),
            modified_ms: metadata_to_epoch_ms(&metadata).unwrap_or(0),
            is_dir: metadata.is_dir(),
        });
    }
    Ok(entries)
}

/// Names present in `dir`: the live destination listing.
pub fn list_names(dir: &Path) -> TransferResult<HashSet<String>> {
    Ok(list_entries(dir)?.into_iter().map(|e| e.name).collect())
}

/// Sibling temp path a copy is staged into before the final rename.
pub fn partial_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    dest.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub buffer_size: usize,
    pub preserve_mtime: bool,
    pub algorithm: HashAlgorithm,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: crate::config::DEFAULT_COPY_BUFFER_SIZE,
            preserve_mtime: true,
            algorithm: HashAlgorithm::Xxh3_64,
        }
    }
}

/// Copy `source` into `staging`, hashing the source bytes on the way.
///
/// `progress_callback` receives the running byte count after every chunk and
/// returns false to cancel. The staging file is fsynced before returning; the
/// caller owns the rename (or removal) of `staging`.
pub fn copy_file_with_progress<F>(
    source: &Path,
    staging: &Path,
    options: &CopyOptions,
    mut progress_callback: F,
) -> Result<(u64, ContentHash), CopyError>
where
    F: FnMut(u64) -> bool,
{
    let src_file = File::open(source)?;
    let src_metadata = src_file.metadata()?;

    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut dest_file = File::create(staging)?;
    let mut reader = BufReader::with_capacity(options.buffer_size, src_file);
    let mut writer = BufWriter::with_capacity(options.buffer_size, &mut dest_file);
    let mut hasher = ContentHasher::new(options.algorithm);

    let mut buffer = vec![0u8; options.buffer_size];
    let mut bytes_copied: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        writer.write_all(&buffer[..bytes_read])?;
        hasher.update(&buffer[..bytes_read]);
        bytes_copied += bytes_read as u64;

        if !progress_callback(bytes_copied) {
            return Err(CopyError::Cancelled("Transfer cancelled by user".into()));
        }
    }

    writer.flush()?;
    drop(writer);

    dest_file.sync_all()?;
    drop(dest_file);

    if options.preserve_mtime {
        preserve_mtime(staging, src_metadata.modified()?);
    }

    Ok((bytes_copied, hasher.finish()))
}

/// Stamp `modified` onto `path`. Smart-Resume depends on it, so a failure is
/// reported rather than ignored; the copy itself still stands.
fn preserve_mtime(path: &Path, modified: SystemTime) -> bool {
    match filetime::set_file_mtime(path, filetime::FileTime::from_system_time(modified)) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                path = %path.display(),
                "Failed to preserve modification time, file will not resume as identical: {}", e
            );
            false
        }
    }
}
