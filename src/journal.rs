//! Durable manifest journal for one destination folder.
//!
//! The journal owns the in-memory [`ManifestFile`] exclusively. Callers send
//! upserts and read snapshots; they never touch the backing store. Every
//! upsert mutates memory immediately and enqueues a write of the *entire*
//! manifest onto a single writer task, so:
//!
//! - the store is never written by two operations at once,
//! - writes land in upsert order,
//! - a failed write loses nothing the next write will not carry forward.
//!
//! State per destination: `Unloaded -> Loaded(empty|populated) -> Dirty -> Loaded(populated)`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::errors::{JournalError, JournalResult};
use crate::manifest::{ManifestEntry, ManifestFile, Provenance, MANIFEST_FILENAME};

/// Backing store for manifest bytes.
#[async_trait]
pub trait ManifestStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing has been written yet.
    async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>>;

    /// Replace the whole content at `path`.
    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
}

/// Filesystem store: write to a temp sibling, then rename over the manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsManifestStore;

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| MANIFEST_FILENAME.to_string());
        let temp_file = path.with_file_name(format!("{}.tmp", file_name));

        let result = write_synced(&temp_file, contents, path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_file).await;
        }
        result
    }
}

/// The temp file's bytes must be on the device before the rename publishes
/// it; otherwise a pulled drive can leave an empty manifest behind.
async fn write_synced(temp_file: &Path, contents: &[u8], path: &Path) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(temp_file).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp_file, path).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalState {
    Unloaded,
    Empty,
    Populated,
    /// At least one write is queued or in progress.
    Dirty,
}

enum WriteJob {
    Flush {
        path: PathBuf,
        contents: Vec<u8>,
        done: oneshot::Sender<JournalResult<()>>,
    },
    Barrier(oneshot::Sender<()>),
}

/// Completion handle for one queued write. Dropping it is fire-and-forget.
#[must_use = "drop the handle explicitly if the write outcome is not needed"]
pub struct PendingFlush {
    rx: oneshot::Receiver<JournalResult<()>>,
}

impl PendingFlush {
    pub async fn wait(self) -> JournalResult<()> {
        self.rx.await.map_err(|_| JournalError::WriterClosed)?
    }
}

/// Cheap to clone; all clones share one journal and one writer.
#[derive(Clone)]
pub struct ManifestJournal {
    inner: Arc<JournalInner>,
}

struct JournalInner {
    path: PathBuf,
    store: Arc<dyn ManifestStore>,
    manifest: RwLock<Option<ManifestFile>>,
    loaded: AtomicBool,
    pending: Arc<AtomicUsize>,
    writer: mpsc::UnboundedSender<WriteJob>,
}

impl ManifestJournal {
    /// Create the journal for `folder` and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(folder: &Path, store: Arc<dyn ManifestStore>) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_writer(rx, store.clone(), pending.clone()));

        Self {
            inner: Arc::new(JournalInner {
                path: folder.join(MANIFEST_FILENAME),
                store,
                manifest: RwLock::new(None),
                loaded: AtomicBool::new(false),
                pending,
                writer,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Read the manifest into memory and return it keyed by filename.
    ///
    /// An absent or unparsable file yields an empty map; the journal is then
    /// created fresh on the first upsert.
    pub async fn load(&self) -> HashMap<String, ManifestEntry> {
        let parsed = match self.inner.store.read(&self.inner.path).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<ManifestFile>(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!(
                        path = %self.inner.path.display(),
                        "Failed to parse manifest, starting fresh: {}", e
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(
                    path = %self.inner.path.display(),
                    "Failed to read manifest, starting fresh: {}", e
                );
                None
            }
        };

        let map = parsed.as_ref().map(index_entries).unwrap_or_default();
        info!(
            path = %self.inner.path.display(),
            "Loaded manifest: {} entries", map.len()
        );

        *self.inner.manifest.write() = parsed;
        self.inner.loaded.store(true, Ordering::SeqCst);
        map
    }

    /// Insert or replace the entry for `entry.filename` and queue a full write.
    pub fn upsert(&self, entry: ManifestEntry, provenance: &Provenance) -> PendingFlush {
        let (done, rx) = oneshot::channel();
        let filename = entry.filename.clone();

        // The guard is held until the job is queued so that queue order
        // matches the order of in-memory mutations.
        let mut guard = self.inner.manifest.write();
        let manifest = guard.get_or_insert_with(|| {
            debug!(path = %self.inner.path.display(), "Creating new manifest");
            ManifestFile::new(provenance)
        });
        manifest.upsert(entry, provenance);
        self.inner.loaded.store(true, Ordering::SeqCst);

        match serde_json::to_vec_pretty(&*manifest) {
            Ok(contents) => {
                self.inner.pending.fetch_add(1, Ordering::SeqCst);
                let job = WriteJob::Flush {
                    path: self.inner.path.clone(),
                    contents,
                    done,
                };
                if self.inner.writer.send(job).is_err() {
                    self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                    error!(file = %filename, "Manifest writer is gone; entry kept in memory only");
                }
            }
            Err(e) => {
                let _ = done.send(Err(e.into()));
            }
        }
        drop(guard);

        debug!(file = %filename, "Manifest entry upserted");
        PendingFlush { rx }
    }

    /// Resolves once every write queued before this call has finished.
    pub async fn flushed(&self) {
        let (done, rx) = oneshot::channel();
        if self.inner.writer.send(WriteJob::Barrier(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> HashMap<String, ManifestEntry> {
        self.inner
            .manifest
            .read()
            .as_ref()
            .map(index_entries)
            .unwrap_or_default()
    }

    pub fn get(&self, filename: &str) -> Option<ManifestEntry> {
        self.inner
            .manifest
            .read()
            .as_ref()
            .and_then(|m| m.get(filename).cloned())
    }

    pub fn manifest(&self) -> Option<ManifestFile> {
        self.inner.manifest.read().clone()
    }

    pub fn state(&self) -> JournalState {
        if self.inner.pending.load(Ordering::SeqCst) > 0 {
            return JournalState::Dirty;
        }
        if !self.inner.loaded.load(Ordering::SeqCst) {
            return JournalState::Unloaded;
        }
        match self.inner.manifest.read().as_ref() {
            Some(m) if !m.files.is_empty() => JournalState::Populated,
            _ => JournalState::Empty,
        }
    }
}

fn index_entries(manifest: &ManifestFile) -> HashMap<String, ManifestEntry> {
    manifest
        .files
        .iter()
        .map(|entry| (entry.filename.clone(), entry.clone()))
        .collect()
}

async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    store: Arc<dyn ManifestStore>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Flush {
                path,
                contents,
                done,
            } => {
                let result = store.write(&path, &contents).await.map_err(JournalError::from);
                match &result {
                    Ok(()) => debug!(path = %path.display(), bytes = contents.len(), "Manifest flushed"),
                    // Not retried: the next upsert writes the full state again.
                    Err(e) => error!(path = %path.display(), "Manifest write failed: {}", e),
                }
                pending.fetch_sub(1, Ordering::SeqCst);
                let _ = done.send(result);
            }
            WriteJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{ContentHash, HashAlgorithm};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn provenance() -> Provenance {
        Provenance {
            machine_name: "edit-bay".into(),
            system_os: "Linux".into(),
            app_version: "LastLook v0.2.0".into(),
            session_id: "session-1".into(),
        }
    }

    fn entry(name: &str, size: u64, hash: &str) -> ManifestEntry {
        ManifestEntry::verified(
            name,
            &Path::new("/media/card").join(name),
            size,
            1_700_000_000_000,
            ContentHash {
                algorithm: HashAlgorithm::Xxh3_64,
                value: hash.into(),
            },
        )
    }

    /// Records every write and the peak number of overlapping writes.
    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<Vec<u8>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl ManifestStore for RecordingStore {
        async fn read(&self, _path: &Path) -> std::io::Result<Option<Vec<u8>>> {
            Ok(self.writes.lock().last().cloned())
        }

        async fn write(&self, _path: &Path, contents: &[u8]) -> std::io::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "device busy"));
            }
            self.writes.lock().push(contents.to_vec());
            Ok(())
        }
    }

    fn parse(bytes: &[u8]) -> ManifestFile {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_same_filename_keeps_one_entry() {
        let journal = ManifestJournal::new(Path::new("/backup"), Arc::new(RecordingStore::default()));
        journal.load().await;

        journal.upsert(entry("a.mp4", 10, "aaaa"), &provenance()).wait().await.unwrap();
        journal.upsert(entry("a.mp4", 20, "bbbb"), &provenance()).wait().await.unwrap();

        let snapshot = journal.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["a.mp4"].size_bytes, 20);
        assert_eq!(snapshot["a.mp4"].hash_value, "bbbb");
    }

    #[tokio::test]
    async fn test_back_to_back_upserts_write_sequentially() {
        let store = Arc::new(RecordingStore::default());
        let journal = ManifestJournal::new(Path::new("/backup"), store.clone());
        journal.load().await;

        let first = journal.upsert(entry("a.mp4", 1, "01"), &provenance());
        let second = journal.upsert(entry("b.mp4", 2, "02"), &provenance());
        first.wait().await.unwrap();
        second.wait().await.unwrap();

        let writes = store.writes.lock().clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(parse(&writes[0]).files.len(), 1);
        assert_eq!(parse(&writes[1]), journal.manifest().unwrap());
    }

    #[tokio::test]
    async fn test_writes_apply_in_upsert_order() {
        let store = Arc::new(RecordingStore::default());
        let journal = ManifestJournal::new(Path::new("/backup"), store.clone());

        for i in 0..20u64 {
            let _ = journal.upsert(entry(&format!("clip{:02}.mp4", i), i, "ff"), &provenance());
        }
        journal.flushed().await;

        let writes = store.writes.lock().clone();
        assert_eq!(writes.len(), 20);
        for (i, bytes) in writes.iter().enumerate() {
            assert_eq!(parse(bytes).files.len(), i + 1);
        }
        assert_eq!(journal.state(), JournalState::Populated);
    }

    #[tokio::test]
    async fn test_failed_write_is_carried_by_next_flush() {
        let store = Arc::new(RecordingStore::default());
        store.fail_first.store(true, Ordering::SeqCst);
        let journal = ManifestJournal::new(Path::new("/backup"), store.clone());

        let failed = journal.upsert(entry("a.mp4", 1, "01"), &provenance()).wait().await;
        assert!(matches!(failed, Err(JournalError::Io(_))));
        assert_eq!(journal.snapshot().len(), 1);

        journal.upsert(entry("b.mp4", 2, "02"), &provenance()).wait().await.unwrap();
        let writes = store.writes.lock().clone();
        assert_eq!(writes.len(), 1);
        let on_disk = parse(&writes[0]);
        assert!(on_disk.get("a.mp4").is_some());
        assert!(on_disk.get("b.mp4").is_some());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ManifestJournal::new(dir.path(), Arc::new(FsManifestStore));
        assert_eq!(journal.state(), JournalState::Unloaded);

        assert!(journal.load().await.is_empty());
        assert_eq!(journal.state(), JournalState::Empty);
        assert!(journal.manifest().is_none());
        assert!(!dir.path().join(MANIFEST_FILENAME).exists());

        journal.upsert(entry("a.mp4", 1, "01"), &provenance()).wait().await.unwrap();
        let on_disk = parse(&std::fs::read(dir.path().join(MANIFEST_FILENAME)).unwrap());
        assert_eq!(on_disk.machine_name, "edit-bay");
        assert_eq!(on_disk.session_id, "session-1");
        assert_eq!(on_disk.files.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILENAME);
        std::fs::write(&path, "{ \"manifest_version\": \"1.0\", \"files\": [").unwrap();

        let journal = ManifestJournal::new(dir.path(), Arc::new(FsManifestStore));
        assert!(journal.load().await.is_empty());

        journal.upsert(entry("a.mp4", 1, "01"), &provenance()).wait().await.unwrap();
        let on_disk = parse(&std::fs::read(&path).unwrap());
        assert_eq!(on_disk.manifest_version, "1.0");
        assert_eq!(on_disk.files.len(), 1);
        assert!(!dir.path().join(format!("{}.tmp", MANIFEST_FILENAME)).exists());
    }

    #[tokio::test]
    async fn test_reload_round_trips_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ManifestJournal::new(dir.path(), Arc::new(FsManifestStore));
        journal.upsert(entry("a.mp4", 1, "01"), &provenance()).wait().await.unwrap();
        journal.upsert(entry("b.mp4", 2, "02"), &provenance()).wait().await.unwrap();

        let reopened = ManifestJournal::new(dir.path(), Arc::new(FsManifestStore));
        let map = reopened.load().await;
        assert_eq!(map.len(), 2);
        assert_eq!(map["b.mp4"].hash_value, "02");
        assert_eq!(reopened.state(), JournalState::Populated);
    }

    #[tokio::test]
    async fn test_fs_store_replaces_manifest_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILENAME);
        let temp = dir.path().join(format!("{}.tmp", MANIFEST_FILENAME));

        FsManifestStore.write(&path, b"{\"first\": 1}").await.unwrap();
        FsManifestStore.write(&path, b"{\"second\": 2}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"second\": 2}");
        assert!(!temp.exists());
        assert_eq!(
            FsManifestStore.read(&path).await.unwrap().unwrap(),
            b"{\"second\": 2}"
        );
    }

    #[tokio::test]
    async fn test_fs_store_cleans_temp_file_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory in the manifest's place makes the rename fail.
        let path = dir.path().join(MANIFEST_FILENAME);
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        assert!(FsManifestStore.write(&path, b"{}").await.is_err());
        assert!(!dir.path().join(format!("{}.tmp", MANIFEST_FILENAME)).exists());
        assert!(path.join("occupied").exists());
    }

    struct GatedStore {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl ManifestStore for GatedStore {
        async fn read(&self, _path: &Path) -> std::io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn write(&self, _path: &Path, _contents: &[u8]) -> std::io::Result<()> {
            let permit = self.gate.acquire().await.map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
            })?;
            permit.forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_is_dirty_while_write_pending() {
        let store = Arc::new(GatedStore {
            gate: tokio::sync::Semaphore::new(0),
        });
        let journal = ManifestJournal::new(Path::new("/backup"), store.clone());
        journal.load().await;

        let pending = journal.upsert(entry("a.mp4", 1, "01"), &provenance());
        assert_eq!(journal.state(), JournalState::Dirty);
        // Memory is already authoritative.
        assert!(journal.get("a.mp4").is_some());

        store.gate.add_permits(1);
        pending.wait().await.unwrap();
        assert_eq!(journal.state(), JournalState::Populated);
    }
}
