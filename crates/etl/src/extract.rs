#![forbid(unsafe_code)]

use crate::docs::SidecarSet;
use crate::error::EtlError;
use sdb_core::bids::BidsName;
use sdb_core::{FileIdentity, Section};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// One flattened source record: the union of a document's sections plus
/// which sections were present (the optional tables only get rows for
/// documents that carry them).
#[derive(Clone, Debug)]
pub struct ExtractedRecord {
    pub source_path: PathBuf,
    pub file_id: FileIdentity,
    pub sections: BTreeSet<Section>,
    pub record: BTreeMap<String, Value>,
}

/// Flattens all collected documents into source records. Documents without
/// a well-formed `file_id` are skipped with a warning; an empty result set
/// aborts the run.
pub fn extract(docs: &SidecarSet) -> Result<Vec<ExtractedRecord>, EtlError> {
    if docs.is_empty() {
        return Err(EtlError::EmptyInput("collected sidecar documents"));
    }

    let mut records = Vec::with_capacity(docs.len());
    for (path, document) in docs.iter() {
        let Some(file_id) = document.file_id() else {
            tracing::warn!(path = %path.display(), "sidecar document has no usable file_id, skipped");
            continue;
        };
        let sections: BTreeSet<Section> = document.sections_present().collect();
        let mut record = document.record();
        enrich_from_file_name(&mut record, sections.contains(&Section::Labels));
        records.push(ExtractedRecord {
            source_path: path.clone(),
            file_id,
            sections,
            record,
        });
    }

    if records.is_empty() {
        return Err(EtlError::EmptyInput("extracted records"));
    }
    tracing::info!(records = records.len(), "extraction finished");
    Ok(records)
}

/// Derives entity attributes from the data file's name wherever the
/// document does not state them explicitly. Explicit fields always win.
fn enrich_from_file_name(record: &mut BTreeMap<String, Value>, is_label: bool) {
    let Some(path) = record.get("file_path").and_then(Value::as_str) else {
        return;
    };
    let name = BidsName::parse(path, is_label);
    let derived = [
        ("bids_subject", name.subject),
        ("bids_session", name.session),
        ("bids_acquisition", name.acquisition),
        ("bids_suffix", name.suffix),
        ("bids_extension", name.extension),
        ("hemisphere", name.hemisphere),
        ("structure", name.structure),
    ];
    for (key, value) in derived {
        if let Some(value) = value {
            record
                .entry(key.to_string())
                .or_insert_with(|| Value::String(value));
        }
    }
}

#[derive(Serialize)]
struct StoredRecord<'a> {
    source_path: &'a Path,
    record: &'a BTreeMap<String, Value>,
}

/// Persists the combined extraction result under `dir` so a run can be
/// inspected or replayed without re-reading the document tree.
pub fn store_extracted(records: &[ExtractedRecord], dir: &Path) -> Result<PathBuf, EtlError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("extracted_data.json");
    let stored: Vec<StoredRecord<'_>> = records
        .iter()
        .map(|r| StoredRecord {
            source_path: &r.source_path,
            record: &r.record,
        })
        .collect();
    let mut text = serde_json::to_string_pretty(&stored)?;
    text.push('\n');
    std::fs::write(&path, text)?;
    tracing::debug!(path = %path.display(), "combined extraction artifact written");
    Ok(path)
}
