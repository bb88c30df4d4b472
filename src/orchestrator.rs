//! Transfer orchestrator: pre-flight, conflict pause, and the per-file batch loop.
//!
//! ```text
//! Idle -> PreflightChecked -> Clean --------------> Executing -> Completed
//!                          \-> AwaitingResolution -/          \-> Cancelled -> Idle
//! ```
//!
//! One file is in flight at a time. Copier notifications are applied to the
//! observable batch by a side task so the loop itself never blocks on them.
//! Journal writes are fire-and-forget from the loop; the journal serializes them.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::conflict::{detect, ConflictSet, Resolution};
use crate::control::TransferControl;
use crate::copier::{ByteCopier, CopyEvent};
use crate::errors::{TransferError, TransferResult};
use crate::file_ops::{list_names, stat_file_async, FileStat};
use crate::journal::{FsManifestStore, ManifestJournal, ManifestStore};
use crate::manifest::{EntryStatus, ManifestEntry, Provenance};
use crate::resume::{compare, ResumeVerdict};
use crate::transfer_state::{FileStatus, TransferBatch, TransferPhase, TransferSnapshot};

/// Notifications for UIs and log sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    #[serde(rename_all = "camelCase")]
    BatchStarted {
        batch_id: String,
        file_count: usize,
        total_bytes: u64,
        resolution: Resolution,
    },
    ConflictsDetected { names: Vec<String> },
    #[serde(rename_all = "camelCase")]
    FileStarted { filename: String, size_bytes: u64 },
    #[serde(rename_all = "camelCase")]
    Progress {
        filename: String,
        bytes_transferred: u64,
        bytes_total: u64,
    },
    Verifying { filename: String },
    /// `copied` is false when Smart-Resume found the destination identical.
    FileVerified { filename: String, copied: bool },
    FileSkipped { filename: String },
    FileFailed { filename: String, error: String },
    #[serde(rename_all = "camelCase")]
    BatchFinished { batch_id: String, outcome: BatchOutcome },
}

pub type TransferEventSender = mpsc::UnboundedSender<TransferEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

/// Summary of one run, returned when the loop exits.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub outcome: BatchOutcome,
    pub resolution: Resolution,
    pub copied: Vec<String>,
    pub identical: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFile>,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn verified_count(&self) -> usize {
        self.copied.len() + self.identical.len()
    }
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// Empty selection or a side not set; nothing happened.
    Ignored,
    /// Collisions found; call [`TransferOrchestrator::resolve`].
    AwaitingResolution(ConflictSet),
    /// The pending batch was cancelled before any file was touched.
    Aborted,
    Finished(BatchReport),
}

pub struct TransferOrchestrator {
    config: EngineConfig,
    provenance: Provenance,
    copier: Arc<dyn ByteCopier>,
    store: Arc<dyn ManifestStore>,
    control: Arc<TransferControl>,
    source: RwLock<Option<PathBuf>>,
    destination: RwLock<Option<PathBuf>>,
    journal: RwLock<Option<ManifestJournal>>,
    destination_listing: RwLock<HashSet<String>>,
    verified: RwLock<HashSet<String>>,
    phase: RwLock<TransferPhase>,
    pending: Mutex<Option<Vec<String>>>,
    batch: Arc<RwLock<Option<TransferBatch>>>,
    events: Option<TransferEventSender>,
}

impl TransferOrchestrator {
    pub fn new(config: EngineConfig, copier: Arc<dyn ByteCopier>) -> Self {
        let provenance = Provenance::detect(&config);
        info!(session = %provenance.session_id, "Transfer orchestrator ready");
        Self {
            config,
            provenance,
            copier,
            store: Arc::new(FsManifestStore),
            control: Arc::new(TransferControl::new()),
            source: RwLock::new(None),
            destination: RwLock::new(None),
            journal: RwLock::new(None),
            destination_listing: RwLock::new(HashSet::new()),
            verified: RwLock::new(HashSet::new()),
            phase: RwLock::new(TransferPhase::Idle),
            pending: Mutex::new(None),
            batch: Arc::new(RwLock::new(None)),
            events: None,
        }
    }

    /// Replace the manifest backing store. Applies to destinations mounted afterwards.
    pub fn with_store(mut self, store: Arc<dyn ManifestStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_events(mut self, events: TransferEventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn set_source(&self, path: &Path) -> TransferResult<()> {
        self.ensure_not_busy()?;
        if !path.is_dir() {
            return Err(TransferError::SourceNotFound(path.display().to_string()));
        }
        info!(path = %path.display(), "Source set");
        *self.source.write() = Some(path.to_path_buf());
        Ok(())
    }

    /// List the destination and load its journal. Returns the journal contents.
    pub async fn mount_destination(
        &self,
        path: &Path,
    ) -> TransferResult<HashMap<String, ManifestEntry>> {
        self.ensure_not_busy()?;
        if !path.is_dir() {
            return Err(TransferError::DestinationNotFound(path.display().to_string()));
        }

        let dir = path.to_path_buf();
        let listing = tokio::task::spawn_blocking(move || list_names(&dir))
            .await
            .map_err(|e| TransferError::Internal(e.to_string()))??;

        let journal = ManifestJournal::new(path, self.store.clone());
        let entries = journal.load().await;
        let verified: HashSet<String> = entries
            .values()
            .filter(|e| e.is_verified())
            .map(|e| e.filename.clone())
            .collect();

        // A batch may have started while the listing was read; re-check
        // before swapping anything it depends on.
        let mut phase = self.phase.write();
        if phase.is_busy() {
            return Err(TransferError::Busy(format!("cannot mount while {:?}", *phase)));
        }
        if self.pending.lock().take().is_some() {
            info!("Destination changed; pending batch dropped");
            *phase = TransferPhase::Idle;
        }

        info!(
            path = %path.display(),
            "Destination mounted: {} entries, {} journaled as verified",
            listing.len(),
            verified.len()
        );
        *self.destination_listing.write() = listing;
        *self.verified.write() = verified;
        *self.journal.write() = Some(journal);
        *self.destination.write() = Some(path.to_path_buf());
        Ok(entries)
    }

    /// Pre-flight a selection and, when it is conflict-free, run it.
    pub async fn start(&self, selection: Vec<String>) -> TransferResult<StartOutcome> {
        let selection = dedup(selection);
        if selection.is_empty() || !self.sides_ready() {
            debug!("Start ignored: empty selection or paths not set");
            return Ok(StartOutcome::Ignored);
        }

        {
            let mut phase = self.phase.write();
            if !phase.accepts_start() {
                return Err(TransferError::Busy(format!("cannot start while {:?}", *phase)));
            }
            *phase = TransferPhase::PreflightChecked;
        }
        self.control.reset();
        self.copier.reset();

        let conflicts = detect(selection.as_slice(), &self.destination_listing.read());
        if conflicts.is_empty() {
            self.set_phase(TransferPhase::Clean);
            let report = self.execute(selection, Resolution::OverwriteSmart).await?;
            return Ok(StartOutcome::Finished(report));
        }

        info!("{} of {} selected files already exist at destination", conflicts.len(), selection.len());
        {
            let mut phase = self.phase.write();
            *self.pending.lock() = Some(selection);
            *phase = TransferPhase::AwaitingResolution;
        }
        self.emit(TransferEvent::ConflictsDetected {
            names: conflicts.names.clone(),
        });
        Ok(StartOutcome::AwaitingResolution(conflicts))
    }

    /// Answer a conflict pause. Ignored unless a batch is awaiting resolution.
    pub async fn resolve(&self, resolution: Resolution) -> TransferResult<StartOutcome> {
        // Claiming the pending selection and leaving AwaitingResolution happen
        // under one lock, so only one caller can ever run it.
        let selection = {
            let mut phase = self.phase.write();
            if *phase != TransferPhase::AwaitingResolution {
                debug!("Resolution ignored in phase {:?}", *phase);
                return Ok(StartOutcome::Ignored);
            }
            let Some(selection) = self.pending.lock().take() else {
                return Ok(StartOutcome::Ignored);
            };
            *phase = if resolution == Resolution::Cancel {
                TransferPhase::Idle
            } else {
                TransferPhase::Executing
            };
            selection
        };

        if resolution == Resolution::Cancel {
            info!("Transfer cancelled at conflict prompt");
            return Ok(StartOutcome::Aborted);
        }

        let report = self.execute(selection, resolution).await?;
        Ok(StartOutcome::Finished(report))
    }

    /// Raise the shared cancel flag and abort the in-flight copy.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.control.cancel();
        self.copier.cancel();
    }

    pub fn phase(&self) -> TransferPhase {
        *self.phase.read()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let batch = self.batch.read().clone();
        TransferSnapshot {
            phase: self.phase(),
            metrics: batch.as_ref().map(TransferBatch::metrics),
            batch,
            verified: self.verified_files(),
        }
    }

    /// Names verified at the destination: journaled or confirmed this session.
    pub fn verified_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.verified.read().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn destination_listing(&self) -> HashSet<String> {
        self.destination_listing.read().clone()
    }

    pub fn journal(&self) -> Option<ManifestJournal> {
        self.journal.read().clone()
    }

    pub fn control(&self) -> Arc<TransferControl> {
        self.control.clone()
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn sides_ready(&self) -> bool {
        self.source.read().is_some()
            && self.destination.read().is_some()
            && self.journal.read().is_some()
    }

    fn ensure_not_busy(&self) -> TransferResult<()> {
        let phase = self.phase.read();
        if phase.is_busy() {
            return Err(TransferError::Busy(format!("batch in progress ({:?})", *phase)));
        }
        Ok(())
    }

    fn set_phase(&self, phase: TransferPhase) {
        let mut current = self.phase.write();
        debug!("Phase {:?} -> {:?}", *current, phase);
        *current = phase;
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    async fn execute(
        &self,
        selection: Vec<String>,
        resolution: Resolution,
    ) -> TransferResult<BatchReport> {
        let (source, destination, journal) = match self.mounted() {
            Some(sides) => sides,
            None => {
                self.set_phase(TransferPhase::Idle);
                return Err(TransferError::Internal("paths unset during execution".into()));
            }
        };

        let mut files = Vec::with_capacity(selection.len());
        for name in selection {
            match stat_file_async(&source.join(&name)).await {
                Ok(stat) if stat.is_dir => debug!(file = %name, "Skipping directory"),
                Ok(stat) => files.push((name, stat.size)),
                Err(_) => files.push((name, 0)),
            }
        }

        let batch = TransferBatch::new(files, resolution);
        let batch_id = batch.id.clone();
        let names: Vec<String> = batch.files.iter().map(|f| f.name.clone()).collect();
        info!(
            batch = %batch_id,
            "Starting transfer: {} files, {} bytes, {:?}",
            names.len(),
            batch.total_bytes,
            resolution
        );
        self.emit(TransferEvent::BatchStarted {
            batch_id: batch_id.clone(),
            file_count: names.len(),
            total_bytes: batch.total_bytes,
            resolution,
        });
        *self.batch.write() = Some(batch);
        self.set_phase(TransferPhase::Executing);

        let mut report = BatchReport {
            batch_id: batch_id.clone(),
            outcome: BatchOutcome::Completed,
            resolution,
            copied: Vec::new(),
            identical: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            completed_bytes: 0,
            total_bytes: 0,
            duration_ms: 0,
        };

        for name in &names {
            if self.control.is_cancelled() {
                report.outcome = BatchOutcome::Cancelled;
                break;
            }

            let src_path = source.join(name);
            let dst_path = destination.join(name);

            let src_stat = stat_file_async(&src_path).await;
            match &src_stat {
                Ok(stat) => self.with_batch(|b| b.set_file_size(name, stat.size)),
                Err(e) => warn!(file = %name, "Source stat failed: {}", e),
            }

            let exists = self.destination_listing.read().contains(name);

            if exists && resolution == Resolution::SkipExisting {
                debug!(file = %name, "Skipping existing file");
                self.with_batch(|b| b.finish_file(name, FileStatus::Skipped, None));
                self.emit(TransferEvent::FileSkipped {
                    filename: name.clone(),
                });
                report.skipped.push(name.clone());
                continue;
            }

            if exists && resolution == Resolution::OverwriteSmart {
                let dst_stat = stat_file_async(&dst_path).await;
                let tolerance = self.config.smart_resume_tolerance_ms;
                if compare(&src_stat, &dst_stat, tolerance) == ResumeVerdict::Identical {
                    debug!(file = %name, "Smart-Resume: destination identical, not copying");
                    if let Ok(stat) = &src_stat {
                        self.restamp_existing(&journal, name, stat);
                    }
                    self.mark_verified(name);
                    self.with_batch(|b| b.finish_file(name, FileStatus::Verified, None));
                    self.emit(TransferEvent::FileVerified {
                        filename: name.clone(),
                        copied: false,
                    });
                    report.identical.push(name.clone());
                    continue;
                }
            }

            let size = self
                .batch
                .read()
                .as_ref()
                .and_then(|b| b.file(name).map(|f| f.size_bytes))
                .unwrap_or(0);
            self.with_batch(|b| b.start_file(name));
            self.emit(TransferEvent::FileStarted {
                filename: name.clone(),
                size_bytes: size,
            });

            let (tx, rx) = mpsc::unbounded_channel();
            let drain = tokio::spawn(apply_copy_events(
                rx,
                name.clone(),
                self.batch.clone(),
                self.events.clone(),
            ));
            let result = self.copier.copy(&src_path, &dst_path, tx).await;
            let _ = drain.await;

            match result {
                Ok(hash) => {
                    let modified_ms = src_stat.as_ref().map(|s| s.modified_ms).unwrap_or(0);
                    let entry = ManifestEntry::verified(name, &src_path, size, modified_ms, hash);
                    // Durability is the journal's concern; the loop moves on.
                    drop(journal.upsert(entry, &self.provenance));
                    self.mark_verified(name);
                    self.with_batch(|b| b.finish_file(name, FileStatus::Verified, None));
                    self.emit(TransferEvent::FileVerified {
                        filename: name.clone(),
                        copied: true,
                    });
                    info!(file = %name, "Transferred and verified");
                    report.copied.push(name.clone());
                }
                Err(e) if e.is_cancelled() => {
                    info!(file = %name, "Copy cancelled");
                    self.with_batch(|b| b.abandon_file(name));
                    report.outcome = BatchOutcome::Cancelled;
                    break;
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!(file = %name, "Transfer failed: {}", error);
                    self.with_batch(|b| b.finish_file(name, FileStatus::Failed, Some(error.clone())));
                    self.emit(TransferEvent::FileFailed {
                        filename: name.clone(),
                        error: error.clone(),
                    });
                    report.failed.push(FailedFile {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        journal.flushed().await;

        if let Some(batch) = self.batch.write().take() {
            report.completed_bytes = batch.completed_bytes;
            report.total_bytes = batch.total_bytes;
            report.duration_ms = batch.elapsed().as_millis() as u64;
        }

        info!(
            batch = %batch_id,
            "Transfer {:?}: {} copied, {} identical, {} skipped, {} failed",
            report.outcome,
            report.copied.len(),
            report.identical.len(),
            report.skipped.len(),
            report.failed.len()
        );

        match report.outcome {
            BatchOutcome::Completed => self.set_phase(TransferPhase::Completed),
            BatchOutcome::Cancelled => {
                self.set_phase(TransferPhase::Cancelled);
                self.set_phase(TransferPhase::Idle);
            }
        }
        self.emit(TransferEvent::BatchFinished {
            batch_id,
            outcome: report.outcome,
        });
        Ok(report)
    }

    fn mounted(&self) -> Option<(PathBuf, PathBuf, ManifestJournal)> {
        let source = self.source.read().clone()?;
        let destination = self.destination.read().clone()?;
        let journal = self.journal.read().clone()?;
        Some((source, destination, journal))
    }

    fn with_batch<F: FnOnce(&mut TransferBatch)>(&self, f: F) {
        if let Some(batch) = self.batch.write().as_mut() {
            f(batch);
        }
    }

    fn mark_verified(&self, name: &str) {
        self.destination_listing.write().insert(name.to_string());
        self.verified.write().insert(name.to_string());
    }

    /// Identical without a copy: refresh a prior entry that still describes the
    /// source. No fresh hash exists, so nothing new is recorded otherwise.
    fn restamp_existing(&self, journal: &ManifestJournal, name: &str, source: &FileStat) {
        let Some(mut entry) = journal.get(name) else {
            return;
        };
        let drift = entry.modified_timestamp.abs_diff(source.modified_ms);
        if entry.size_bytes != source.size || drift >= self.config.smart_resume_tolerance_ms {
            debug!(file = %name, "Journal entry no longer matches source; left as is");
            return;
        }
        entry.status = EntryStatus::Verified;
        entry.verified_at = Utc::now();
        drop(journal.upsert(entry, &self.provenance));
    }
}

async fn apply_copy_events(
    mut rx: mpsc::UnboundedReceiver<CopyEvent>,
    name: String,
    batch: Arc<RwLock<Option<TransferBatch>>>,
    events: Option<TransferEventSender>,
) {
    while let Some(event) = rx.recv().await {
        let forwarded = match event {
            CopyEvent::Progress {
                bytes_transferred,
                bytes_total,
                ..
            } => {
                if let Some(b) = batch.write().as_mut() {
                    b.update_file_progress(&name, bytes_transferred);
                }
                TransferEvent::Progress {
                    filename: name.clone(),
                    bytes_transferred,
                    bytes_total,
                }
            }
            CopyEvent::Verifying { .. } => {
                if let Some(b) = batch.write().as_mut() {
                    b.mark_verifying(&name);
                }
                TransferEvent::Verifying {
                    filename: name.clone(),
                }
            }
        };
        if let Some(tx) = &events {
            let _ = tx.send(forwarded);
        }
    }
}

/// First occurrence wins; order is kept.
fn dedup(selection: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    selection
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
