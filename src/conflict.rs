//! Pre-flight conflict detection and the resolution choices offered for it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a batch with name collisions should proceed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Copy, but skip files Smart-Resume finds identical.
    #[default]
    OverwriteSmart,
    /// Recopy every file regardless of apparent identity.
    ForceOverwrite,
    /// Leave anything already at the destination alone.
    SkipExisting,
    /// Abort before touching any file.
    Cancel,
}

/// Names present in both the selection and the destination listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    pub names: Vec<String>,
}

impl ConflictSet {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// Selected names that already exist at the destination, in selection order.
pub fn detect<S: AsRef<str>>(selection: &[S], destination_listing: &HashSet<String>) -> ConflictSet {
    let mut seen = HashSet::new();
    let names = selection
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| destination_listing.contains(*name))
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect();
    ConflictSet { names }
}
