//! Read-only library snapshot.
//!
//! Loaded once per run from a reference-manager JSON export and treated as
//! immutable for the run's duration. Identifiers and URLs are normalized at
//! load time into lookup indexes so the per-occurrence matching tiers are
//! plain map probes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Contributor, CoreError};
use crate::identifier::{Identifier, IdentifierKind, normalize};

/// One bibliographic entry as exported by the reference manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    /// Raw identifier strings (DOI, preprint id, URL); normalized at load.
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The immutable library for one run, with normalized lookup indexes.
pub struct LibrarySnapshot {
    entries: Vec<LibraryEntry>,
    /// Canonical identifier → entry index (from the identifiers field).
    by_identifier: HashMap<Identifier, usize>,
    /// Canonical form of the entry's URL → entry index. Keyed by whatever
    /// [`normalize`] makes of the URL, so a DOI-resolver URL in the library
    /// meets a bare DOI in the occurrence on equal terms.
    by_url: HashMap<String, usize>,
}

impl LibrarySnapshot {
    pub fn from_entries(entries: Vec<LibraryEntry>) -> Self {
        let mut by_identifier = HashMap::new();
        let mut by_url = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            for raw in &entry.identifiers {
                let id = normalize(raw);
                if id.kind != IdentifierKind::None {
                    by_identifier.entry(id).or_insert(idx);
                }
            }
            if let Some(ref url) = entry.url {
                let id = normalize(url);
                if id.kind != IdentifierKind::None {
                    by_url.entry(id.canonical).or_insert(idx);
                }
            }
        }

        tracing::debug!(
            entries = entries.len(),
            identifiers = by_identifier.len(),
            urls = by_url.len(),
            "library snapshot indexed"
        );

        Self {
            entries,
            by_identifier,
            by_url,
        }
    }

    /// Load a snapshot from a JSON export file (an array of entries).
    /// Unreadable or invalid snapshots are fatal before the run starts.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Library(format!("cannot read {}: {}", path.display(), e))
        })?;
        let entries: Vec<LibraryEntry> = serde_json::from_str(&content).map_err(|e| {
            CoreError::Library(format!("invalid snapshot {}: {}", path.display(), e))
        })?;
        Ok(Self::from_entries(entries))
    }

    /// Exact lookup against the entry identifier lists.
    pub fn find_by_identifier(&self, id: &Identifier) -> Option<&LibraryEntry> {
        self.by_identifier.get(id).map(|&idx| &self.entries[idx])
    }

    /// Lookup against the canonical form of entry URLs.
    pub fn find_by_url_form(&self, canonical: &str) -> Option<&LibraryEntry> {
        self.by_url.get(canonical).map(|&idx| &self.entries[idx])
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
