//! On-disk manifest format.
//!
//! Field names are the wire contract of `lastlook_manifest.json` and must not
//! change; readers on other machines rely on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::System;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::file_ops::normalize_path;
use crate::hashing::{ContentHash, HashAlgorithm};

pub const MANIFEST_FILENAME: &str = "lastlook_manifest.json";
pub const MANIFEST_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Verified,
    Failed,
    Skipped,
}

/// One verified transfer record. `filename` is the key within a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub rel_path: String,
    pub source_path: String,
    pub size_bytes: u64,
    /// Source mtime at transfer, milliseconds since the Unix epoch
    pub modified_timestamp: i64,
    pub hash_type: HashAlgorithm,
    pub hash_value: String,
    pub status: EntryStatus,
    pub verified_at: DateTime<Utc>,
}

impl ManifestEntry {
    /// Record for a file whose copy was just hashed and confirmed.
    pub fn verified(
        filename: &str,
        source_path: &Path,
        size_bytes: u64,
        modified_timestamp: i64,
        hash: ContentHash,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            rel_path: filename.to_string(),
            source_path: normalize_path(source_path),
            size_bytes,
            modified_timestamp,
            hash_type: hash.algorithm,
            hash_value: hash.value,
            status: EntryStatus::Verified,
            verified_at: Utc::now(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == EntryStatus::Verified
    }
}

/// One destination folder's journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub manifest_version: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub app_version: String,
    pub machine_name: String,
    pub system_os: String,
    pub files: Vec<ManifestEntry>,
}

impl ManifestFile {
    pub fn new(provenance: &Provenance) -> Self {
        let now = Utc::now();
        Self {
            manifest_version: MANIFEST_SCHEMA_VERSION.to_string(),
            session_id: provenance.session_id.clone(),
            created_at: now,
            last_updated: now,
            app_version: provenance.app_version.clone(),
            machine_name: provenance.machine_name.clone(),
            system_os: provenance.system_os.clone(),
            files: Vec::new(),
        }
    }

    /// Replace the entry with the same filename, or append.
    pub fn upsert(&mut self, entry: ManifestEntry, provenance: &Provenance) {
        self.last_updated = Utc::now();
        self.app_version = provenance.app_version.clone();
        self.session_id = provenance.session_id.clone();

        match self.files.iter_mut().find(|f| f.filename == entry.filename) {
            Some(existing) => *existing = entry,
            None => self.files.push(entry),
        }
    }

    pub fn get(&self, filename: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|f| f.filename == filename)
    }
}

/// Who wrote a manifest: stamped on creation and refreshed on every upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub machine_name: String,
    pub system_os: String,
    pub app_version: String,
    pub session_id: String,
}

impl Provenance {
    /// Detect machine identity for a new session.
    pub fn detect(config: &EngineConfig) -> Self {
        Self {
            machine_name: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            system_os: System::long_os_version()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            app_version: config.app_version(),
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(session: &str) -> Provenance {
        Provenance {
            machine_name: "edit-bay".into(),
            system_os: "Windows 11".into(),
            app_version: "LastLook v0.2.0".into(),
            session_id: session.into(),
        }
    }

    fn entry(name: &str, hash: &str) -> ManifestEntry {
        ManifestEntry::verified(
            name,
            Path::new(r"E:\DCIM\clip.mp4"),
            42,
            1_700_000_000_000,
            ContentHash {
                algorithm: HashAlgorithm::Xxh3_64,
                value: hash.into(),
            },
        )
    }

    #[test]
    fn test_wire_format_field_names() {
        let mut manifest = ManifestFile::new(&provenance("s-1"));
        manifest.upsert(entry("clip.mp4", "00ff"), &provenance("s-1"));
        let json = serde_json::to_value(&manifest).unwrap();

        for key in [
            "manifest_version",
            "session_id",
            "created_at",
            "last_updated",
            "app_version",
            "machine_name",
            "system_os",
            "files",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        let file = &json["files"][0];
        assert_eq!(file["rel_path"], "clip.mp4");
        assert_eq!(file["source_path"], "E:/DCIM/clip.mp4");
        assert_eq!(file["size_bytes"], 42);
        assert_eq!(file["modified_timestamp"], 1_700_000_000_000i64);
        assert_eq!(file["hash_type"], "xxh3_64");
        assert_eq!(file["status"], "verified");
        assert_eq!(json["manifest_version"], "1.0");
    }

    #[test]
    fn test_upsert_replaces_same_filename() {
        let mut manifest = ManifestFile::new(&provenance("s-1"));
        manifest.upsert(entry("a.mp4", "1111"), &provenance("s-1"));
        manifest.upsert(entry("b.mp4", "2222"), &provenance("s-1"));
        manifest.upsert(entry("a.mp4", "3333"), &provenance("s-2"));

        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].filename, "a.mp4");
        assert_eq!(manifest.get("a.mp4").unwrap().hash_value, "3333");
        assert_eq!(manifest.session_id, "s-2");
    }

    #[test]
    fn test_parses_foreign_manifest() {
        let raw = r#"{
          "manifest_version": "1.0",
          "session_id": "5b0c",
          "created_at": "2024-03-01T10:00:00.000Z",
          "last_updated": "2024-03-01T10:05:00.000Z",
          "app_version": "LastLook v0.1.0",
          "machine_name": "laptop",
          "system_os": "macOS",
          "files": [{
            "filename": "A001.mov",
            "rel_path": "A001.mov",
            "source_path": "/Volumes/CARD/A001.mov",
            "size_bytes": 1024,
            "modified_timestamp": 1709287200000,
            "hash_type": "md5",
            "hash_value": "d41d8cd98f00b204e9800998ecf8427e",
            "status": "skipped",
            "verified_at": "2024-03-01T10:05:00.000Z"
          }]
        }"#;
        let manifest: ManifestFile = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.files[0].hash_type, HashAlgorithm::Md5);
        assert_eq!(manifest.files[0].status, EntryStatus::Skipped);
        assert!(!manifest.files[0].is_verified());
    }
}
