//! The byte copier seam and its native implementation.
//!
//! The orchestrator only ever talks to [`ByteCopier`]: copy one file, report
//! progress and the start of verification through a [`CopyEventSender`], and
//! honour a cooperative `cancel()`. [`NativeCopier`] is the filesystem-backed
//! implementation; tests substitute their own.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::control::TransferControl;
use crate::errors::CopyError;
use crate::file_ops::{copy_file_with_progress, partial_path_for, CopyOptions};
use crate::hashing::{hash_file_with, ContentHash};

/// Notifications emitted while a single file is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CopyEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        filename: String,
        bytes_transferred: u64,
        bytes_total: u64,
    },
    /// Copying is done and post-copy hashing has begun. Sent once per file.
    Verifying { filename: String },
}

pub type CopyEventSender = mpsc::UnboundedSender<CopyEvent>;

#[async_trait]
pub trait ByteCopier: Send + Sync {
    /// Copy `source` to `destination` and return the verified content hash.
    ///
    /// A copy aborted through [`ByteCopier::cancel`] must fail with
    /// [`CopyError::Cancelled`].
    async fn copy(
        &self,
        source: &Path,
        destination: &Path,
        events: CopyEventSender,
    ) -> Result<ContentHash, CopyError>;

    /// Request the in-flight copy to abort. Idempotent.
    fn cancel(&self);

    /// Re-arm after a cancellation so the next batch can run.
    fn reset(&self) {}
}

pub struct NativeCopier {
    options: CopyOptions,
    control: Arc<TransferControl>,
}

impl NativeCopier {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            options,
            control: Arc::new(TransferControl::new()),
        }
    }
}

impl Default for NativeCopier {
    fn default() -> Self {
        Self::new(CopyOptions::default())
    }
}

#[async_trait]
impl ByteCopier for NativeCopier {
    async fn copy(
        &self,
        source: &Path,
        destination: &Path,
        events: CopyEventSender,
    ) -> Result<ContentHash, CopyError> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let options = self.options.clone();
        let control = self.control.clone();

        // Run the blocking file copy in a separate thread to not block the async runtime
        tokio::task::spawn_blocking(move || {
            copy_blocking(&source, &destination, &options, &control, &events)
        })
        .await
        .map_err(|e| CopyError::Internal(e.to_string()))?
    }

    fn cancel(&self) {
        self.control.cancel();
    }

    fn reset(&self) {
        self.control.reset();
    }
}

fn copy_blocking(
    source: &Path,
    destination: &Path,
    options: &CopyOptions,
    control: &TransferControl,
    events: &CopyEventSender,
) -> Result<ContentHash, CopyError> {
    let filename = display_name(source);
    let bytes_total = std::fs::metadata(source)?.len();
    let staging = partial_path_for(destination);

    let result = copy_and_verify(
        source,
        destination,
        &staging,
        options,
        control,
        events,
        &filename,
        bytes_total,
    );
    if result.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn copy_and_verify(
    source: &Path,
    destination: &Path,
    staging: &Path,
    options: &CopyOptions,
    control: &TransferControl,
    events: &CopyEventSender,
    filename: &str,
    bytes_total: u64,
) -> Result<ContentHash, CopyError> {
    let (_, source_hash) = copy_file_with_progress(source, staging, options, |copied| {
        let _ = events.send(CopyEvent::Progress {
            filename: filename.to_string(),
            bytes_transferred: copied,
            bytes_total,
        });
        !control.is_cancelled()
    })?;

    let _ = events.send(CopyEvent::Verifying {
        filename: filename.to_string(),
    });

    let written_hash = hash_file_with(staging, options.algorithm, || !control.is_cancelled())?
        .ok_or_else(|| CopyError::Cancelled("Transfer cancelled during verification".into()))?;

    if written_hash != source_hash {
        return Err(CopyError::HashMismatch(destination.display().to_string()));
    }

    std::fs::rename(staging, destination)?;
    Ok(written_hash)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
