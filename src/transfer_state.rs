//! Observable state of the running batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::conflict::Resolution;
use crate::metrics::TransferMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Idle,
    PreflightChecked,
    Clean,
    AwaitingResolution,
    Executing,
    Completed,
    Cancelled,
}

impl TransferPhase {
    /// Whether a new start request may be accepted.
    pub fn accepts_start(&self) -> bool {
        matches!(
            self,
            TransferPhase::Idle | TransferPhase::Completed | TransferPhase::Cancelled
        )
    }

    /// A batch owns the paths, listing and journal until it finishes.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            TransferPhase::PreflightChecked | TransferPhase::Clean | TransferPhase::Executing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Copying,
    Verifying,
    Verified,
    Skipped,
    Failed,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Verified | FileStatus::Skipped | FileStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTransferState {
    pub name: String,
    pub size_bytes: u64,
    pub bytes_transferred: u64,
    pub status: FileStatus,
    pub error: Option<String>,
}

/// One run over a checked selection. Lives from start to finish of a run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferBatch {
    pub id: String,
    pub resolution: Resolution,
    pub files: Vec<FileTransferState>,
    pub total_bytes: u64,
    /// Sizes of every file that reached a terminal status.
    pub completed_bytes: u64,
    pub current_file: Option<String>,
    pub current_file_bytes: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
}

impl TransferBatch {
    pub fn new(files: Vec<(String, u64)>, resolution: Resolution) -> Self {
        let files: Vec<FileTransferState> = files
            .into_iter()
            .map(|(name, size_bytes)| FileTransferState {
                name,
                size_bytes,
                bytes_transferred: 0,
                status: FileStatus::Pending,
                error: None,
            })
            .collect();
        let total_bytes = files.iter().map(|f| f.size_bytes).sum();

        Self {
            id: Uuid::new_v4().to_string(),
            resolution,
            files,
            total_bytes,
            completed_bytes: 0,
            current_file: None,
            current_file_bytes: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileTransferState> {
        self.files.iter().find(|f| f.name == name)
    }

    fn file_mut(&mut self, name: &str) -> Option<&mut FileTransferState> {
        self.files.iter_mut().find(|f| f.name == name)
    }

    /// Re-stat result for a file about to be processed; keeps totals honest.
    pub fn set_file_size(&mut self, name: &str, size_bytes: u64) {
        if let Some(file) = self.files.iter_mut().find(|f| f.name == name) {
            self.total_bytes = self.total_bytes - file.size_bytes + size_bytes;
            file.size_bytes = size_bytes;
        }
    }

    pub fn start_file(&mut self, name: &str) {
        if let Some(file) = self.file_mut(name) {
            file.status = FileStatus::Copying;
            file.bytes_transferred = 0;
        }
        self.current_file = Some(name.to_string());
        self.current_file_bytes = 0;
    }

    pub fn update_file_progress(&mut self, name: &str, bytes_transferred: u64) {
        if let Some(file) = self.file_mut(name) {
            file.bytes_transferred = bytes_transferred;
        }
        if self.current_file.as_deref() == Some(name) {
            self.current_file_bytes = bytes_transferred;
        }
    }

    pub fn mark_verifying(&mut self, name: &str) {
        if let Some(file) = self.file_mut(name) {
            file.status = FileStatus::Verifying;
        }
    }

    /// Terminal transition; the file's full size counts as completed.
    pub fn finish_file(&mut self, name: &str, status: FileStatus, error: Option<String>) {
        let mut size = 0;
        if let Some(file) = self.file_mut(name) {
            if file.status.is_terminal() {
                return;
            }
            file.status = status;
            file.error = error;
            file.bytes_transferred = file.size_bytes;
            size = file.size_bytes;
        }
        self.completed_bytes += size;
        self.clear_current(name);
    }

    /// The in-flight copy was cancelled; the file goes back to pending.
    pub fn abandon_file(&mut self, name: &str) {
        if let Some(file) = self.file_mut(name) {
            file.status = FileStatus::Pending;
            file.bytes_transferred = 0;
        }
        self.clear_current(name);
    }

    fn clear_current(&mut self, name: &str) {
        if self.current_file.as_deref() == Some(name) {
            self.current_file = None;
            self.current_file_bytes = 0;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn metrics(&self) -> TransferMetrics {
        TransferMetrics::compute(
            self.completed_bytes,
            self.current_file_bytes,
            self.total_bytes,
            self.elapsed(),
        )
    }
}

/// Read-only view handed to UIs.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub phase: TransferPhase,
    pub batch: Option<TransferBatch>,
    pub metrics: Option<TransferMetrics>,
    pub verified: Vec<String>,
}
