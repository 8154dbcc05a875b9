#![forbid(unsafe_code)]

use crate::error::EtlError;
use sdb_core::SidecarDocument;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The collected sidecar documents of one run, keyed by file path. The
/// directory walk that finds the paths is an external collaborator; this
/// type only reads, holds, and rewrites the documents.
#[derive(Clone, Debug, Default)]
pub struct SidecarSet {
    documents: BTreeMap<PathBuf, SidecarDocument>,
}

impl SidecarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the documents at `paths`. An unreadable or malformed document
    /// is skipped with a warning rather than failing the whole collection;
    /// an empty result surfaces later as the extract stage's empty-input
    /// abort.
    pub fn load(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut set = Self::new();
        for path in paths {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "sidecar document unreadable, skipped");
                    continue;
                }
            };
            let parsed = serde_json::from_str::<serde_json::Value>(&text)
                .map_err(|err| err.to_string())
                .and_then(|value| {
                    SidecarDocument::from_value(&value).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(document) => {
                    set.documents.insert(path, document);
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "sidecar document malformed, skipped");
                }
            }
        }
        set
    }

    pub fn insert(&mut self, path: PathBuf, document: SidecarDocument) {
        self.documents.insert(path, document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&SidecarDocument> {
        self.documents.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &SidecarDocument)> {
        self.documents.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PathBuf, &mut SidecarDocument)> {
        self.documents.iter_mut()
    }
}

/// Writes one document back to its path as pretty JSON, matching the shape
/// the walk found it in.
pub fn write_document(path: &Path, document: &SidecarDocument) -> Result<(), EtlError> {
    let mut text = serde_json::to_string_pretty(&document.to_value())?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}
