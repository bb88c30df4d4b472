//! Selected entries, tagged with the panel they were picked from.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Source,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selected {
    pub name: String,
    pub origin: Origin,
}

impl Selected {
    pub fn source(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: Origin::Source,
        }
    }

    pub fn destination(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: Origin::Destination,
        }
    }

    pub fn is_source(&self) -> bool {
        self.origin == Origin::Source
    }
}

/// Source-origin names in selection order, first occurrence wins.
pub fn source_names(selection: &[Selected]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    selection
        .iter()
        .filter(|s| s.is_source())
        .filter(|s| seen.insert(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect()
}
