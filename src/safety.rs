//! Delete gating for source cleanup.
//!
//! A source file may only be removed once the destination journal says it was
//! verified. An optional safety check additionally confirms the file is still
//! physically present on the backup. Nothing here writes to the journal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::manifest::ManifestEntry;
use crate::selection::{source_names, Selected};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStatus {
    Exists,
    Missing,
}

/// Source-origin selections whose journal entry is `verified`.
pub fn deletion_candidates(
    selection: &[Selected],
    verified: &HashMap<String, ManifestEntry>,
) -> Vec<String> {
    source_names(selection)
        .into_iter()
        .filter(|name| verified.get(name).is_some_and(ManifestEntry::is_verified))
        .collect()
}

/// Check each name is still present in `destination`. Errors count as missing.
pub async fn run_safety_check(destination: &Path, names: &[String]) -> Vec<(String, SafetyStatus)> {
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let status = match tokio::fs::try_exists(destination.join(name)).await {
            Ok(true) => SafetyStatus::Exists,
            Ok(false) => SafetyStatus::Missing,
            Err(e) => {
                warn!(file = %name, "Safety check failed: {}", e);
                SafetyStatus::Missing
            }
        };
        results.push((name.clone(), status));
    }
    results
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePlan {
    /// Safety check ran; only names confirmed on the backup are kept.
    Checked(Vec<String>),
    /// No safety check; must be forced.
    Unchecked(Vec<String>),
}

impl DeletePlan {
    pub fn checked(results: &[(String, SafetyStatus)]) -> Self {
        DeletePlan::Checked(
            results
                .iter()
                .filter(|(_, status)| *status == SafetyStatus::Exists)
                .map(|(name, _)| name.clone())
                .collect(),
        )
    }

    pub fn names(&self) -> &[String] {
        match self {
            DeletePlan::Checked(names) | DeletePlan::Unchecked(names) => names,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub name: String,
    pub deleted: bool,
    pub error: Option<String>,
}

/// Remove the planned files from `source_dir`.
///
/// An unchecked plan deletes nothing unless `force` is set. One failed
/// removal does not stop the rest.
pub async fn delete_source_files(
    source_dir: &Path,
    plan: &DeletePlan,
    force: bool,
) -> Vec<DeleteOutcome> {
    if matches!(plan, DeletePlan::Unchecked(_)) && !force {
        warn!("Refusing unchecked source deletion without force");
        return Vec::new();
    }

    let mut outcomes = Vec::with_capacity(plan.names().len());
    for name in plan.names() {
        let outcome = match tokio::fs::remove_file(source_dir.join(name)).await {
            Ok(()) => DeleteOutcome {
                name: name.clone(),
                deleted: true,
                error: None,
            },
            Err(e) => {
                warn!(file = %name, "Failed to delete source file: {}", e);
                DeleteOutcome {
                    name: name.clone(),
                    deleted: false,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }
    info!(
        "Deleted {} of {} source files",
        outcomes.iter().filter(|o| o.deleted).count(),
        outcomes.len()
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{ContentHash, HashAlgorithm};
    use crate::manifest::EntryStatus;
    use std::fs;

    fn journal_map(entries: &[(&str, EntryStatus)]) -> HashMap<String, ManifestEntry> {
        entries
            .iter()
            .map(|(name, status)| {
                let mut entry = ManifestEntry::verified(
                    name,
                    Path::new(name),
                    1,
                    0,
                    ContentHash {
                        algorithm: HashAlgorithm::Xxh3_64,
                        value: "00".into(),
                    },
                );
                entry.status = *status;
                (name.to_string(), entry)
            })
            .collect()
    }

    #[test]
    fn test_candidates_require_verified_source_entries() {
        let verified = journal_map(&[
            ("a.mp4", EntryStatus::Verified),
            ("b.mp4", EntryStatus::Failed),
            ("c.mp4", EntryStatus::Verified),
        ]);
        let selection = vec![
            Selected::source("a.mp4"),
            Selected::source("b.mp4"),
            Selected::destination("c.mp4"),
            Selected::source("d.mp4"),
        ];
        assert_eq!(deletion_candidates(&selection, &verified), vec!["a.mp4"]);
    }

    #[tokio::test]
    async fn test_checked_plan_only_deletes_present_backups() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        for name in ["a.mp4", "b.mp4"] {
            fs::write(src.path().join(name), b"x").unwrap();
        }
        fs::write(dst.path().join("a.mp4"), b"x").unwrap();

        let names = vec!["a.mp4".to_string(), "b.mp4".to_string()];
        let results = run_safety_check(dst.path(), &names).await;
        assert_eq!(
            results,
            vec![
                ("a.mp4".to_string(), SafetyStatus::Exists),
                ("b.mp4".to_string(), SafetyStatus::Missing),
            ]
        );

        let plan = DeletePlan::checked(&results);
        let outcomes = delete_source_files(src.path(), &plan, false).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].deleted);
        assert!(!src.path().join("a.mp4").exists());
        assert!(src.path().join("b.mp4").exists());
    }

    #[tokio::test]
    async fn test_unchecked_plan_needs_force() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.mp4"), b"x").unwrap();
        let plan = DeletePlan::Unchecked(vec!["a.mp4".into(), "ghost.mp4".into()]);

        assert!(delete_source_files(src.path(), &plan, false).await.is_empty());
        assert!(src.path().join("a.mp4").exists());

        let outcomes = delete_source_files(src.path(), &plan, true).await;
        assert!(outcomes[0].deleted);
        assert!(!outcomes[1].deleted);
        assert!(outcomes[1].error.is_some());
    }
}
