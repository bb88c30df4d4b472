//! LastLook transfer engine.
//!
//! Copies media off a removable volume, verifies every file by content hash,
//! and records each verified file in a per-destination manifest journal so that
//! source cleanup can be gated on proof rather than on "the copy returned".

pub mod config;
pub mod conflict;
pub mod control;
pub mod copier;
pub mod errors;
pub mod file_ops;
pub mod hashing;
pub mod journal;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod orchestrator;
pub mod resume;
pub mod safety;
pub mod selection;
pub mod transfer_state;

pub use config::EngineConfig;
pub use conflict::{detect, ConflictSet, Resolution};
pub use copier::{ByteCopier, CopyEvent, NativeCopier};
pub use errors::{CopyError, JournalError, TransferError, TransferResult};
pub use journal::{FsManifestStore, ManifestJournal, ManifestStore};
pub use manifest::{ManifestEntry, ManifestFile, Provenance};
pub use orchestrator::{BatchOutcome, BatchReport, StartOutcome, TransferEvent, TransferOrchestrator};
pub use resume::ResumeVerdict;
pub use selection::{Origin, Selected};
pub use transfer_state::{FileStatus, TransferPhase, TransferSnapshot};
