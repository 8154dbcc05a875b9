#![forbid(unsafe_code)]

use crate::docs::{self, SidecarSet};
use crate::error::EtlError;
use sdb_core::{ColumnValue, Section, bids, normalize};
use sdb_storage::{Filter, Gateway, Row, RowUpdate};
use serde_json::Value;
use std::collections::BTreeMap;

/// Progress of one reconciliation run. Each stage either completes or the
/// run returns `EmptyInput`; there is no partial stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileState {
    Start,
    SubjectsResolved,
    TransformationsResolved,
    Backpropagated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    pub considered: usize,
    pub matched: usize,
    pub unmatched: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackpropReport {
    pub documents: usize,
    pub rewritten: usize,
    pub missing_rows: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub state: ReconcileState,
    pub subjects: StageReport,
    pub transformations: StageReport,
    pub backpropagation: Option<BackpropReport>,
}

/// Runs the three reconciliation stages in order. Backpropagation cadence
/// is the orchestrator's choice, so Stage C only runs when asked for.
pub fn reconcile(
    gateway: &mut Gateway,
    docs: &mut SidecarSet,
    run_backpropagation: bool,
) -> Result<ReconcileReport, EtlError> {
    let subjects = resolve_subjects(gateway)?;
    tracing::info!(
        considered = subjects.considered,
        matched = subjects.matched,
        unmatched = subjects.unmatched,
        "subject resolution finished"
    );

    let transformations = resolve_transformations(gateway, docs)?;
    tracing::info!(
        considered = transformations.considered,
        matched = transformations.matched,
        unmatched = transformations.unmatched,
        "transformation resolution finished"
    );

    let (state, backpropagation) = if run_backpropagation {
        let report = backpropagate(gateway, docs)?;
        tracing::info!(
            documents = report.documents,
            rewritten = report.rewritten,
            missing_rows = report.missing_rows,
            "backpropagation finished"
        );
        (ReconcileState::Backpropagated, Some(report))
    } else {
        (ReconcileState::TransformationsResolved, None)
    };

    Ok(ReconcileReport {
        state,
        subjects,
        transformations,
        backpropagation,
    })
}

/// Stage A: match every file row to a subject by normalized identifier and
/// persist the references as key-scoped updates in one transaction.
fn resolve_subjects(gateway: &mut Gateway) -> Result<StageReport, EtlError> {
    let subjects = gateway.load_table("subjects")?;
    if subjects.is_empty() {
        return Err(EtlError::EmptyInput("subjects table"));
    }
    let files = gateway.load_table("files")?;
    if files.is_empty() {
        return Err(EtlError::EmptyInput("files table"));
    }

    let mut by_key: BTreeMap<String, ColumnValue> = BTreeMap::new();
    for subject in &subjects {
        let Some(acr) = subject.get("patient_id_acr").and_then(ColumnValue::as_text) else {
            continue;
        };
        let id = subject
            .get("subject_id")
            .cloned()
            .unwrap_or(ColumnValue::Null);
        by_key.insert(normalize::subject_key(acr), id);
    }

    let mut report = StageReport::default();
    let mut updates = Vec::with_capacity(files.len());
    for file in &files {
        report.considered += 1;
        let path = file
            .get("file_path")
            .and_then(ColumnValue::as_text)
            .unwrap_or_default();
        let resolved = normalize::subject_key_from_path(path)
            .and_then(|key| by_key.get(&key).cloned());

        let subject_id = match resolved {
            Some(id) => {
                report.matched += 1;
                id
            }
            None => {
                report.unmatched += 1;
                tracing::warn!(file_path = %path, "no subject matches this file, reference left NULL");
                ColumnValue::Null
            }
        };

        let mut values = Row::new();
        values.insert("subject_id".to_string(), subject_id);
        updates.push(RowUpdate {
            values,
            key: file_key(file),
        });
    }

    gateway.update_rows("files", &updates)?;
    Ok(report)
}

/// Stage B: for files whose document carries a `transformations` section,
/// resolve the composite natural key (`file_id`, base-name target) to a
/// transformation and attach its `transform_id`.
fn resolve_transformations(
    gateway: &mut Gateway,
    docs: &SidecarSet,
) -> Result<StageReport, EtlError> {
    let transformations = gateway.load_table("transformations")?;
    if transformations.is_empty() {
        return Err(EtlError::EmptyInput("transformations table"));
    }
    let files = gateway.load_table("files")?;
    if files.is_empty() {
        return Err(EtlError::EmptyInput("files table"));
    }

    let mut identities: BTreeMap<String, bool> = BTreeMap::new();
    for (_, document) in docs.iter() {
        if let Some(identity) = document.file_id() {
            let has_section = document.has_section(Section::Transformations);
            identities
                .entry(identity.to_string())
                .and_modify(|existing| *existing |= has_section)
                .or_insert(has_section);
        }
    }

    let mut report = StageReport::default();
    let mut updates = Vec::new();
    for file in &files {
        let Some(identity) = file.get("file_id").and_then(ColumnValue::as_text) else {
            continue;
        };
        if !identities.get(identity).copied().unwrap_or(false) {
            continue;
        }
        report.considered += 1;

        let path = file
            .get("file_path")
            .and_then(ColumnValue::as_text)
            .unwrap_or_default();
        let target = bids::base_key(path);
        let resolved = transformations.iter().find(|row| {
            row.get("file_id").and_then(ColumnValue::as_text) == Some(identity)
                && row.get("target_id").and_then(ColumnValue::as_text) == Some(target.as_str())
        });

        let transform_id = match resolved {
            Some(row) => {
                report.matched += 1;
                row.get("transform_id").cloned().unwrap_or(ColumnValue::Null)
            }
            None => {
                report.unmatched += 1;
                tracing::warn!(
                    file_path = %path,
                    target = %target,
                    "no transformation matches this file, reference left NULL"
                );
                ColumnValue::Null
            }
        };

        let mut values = Row::new();
        values.insert("transform_id".to_string(), transform_id);
        updates.push(RowUpdate {
            values,
            key: file_key(file),
        });
    }

    gateway.update_rows("files", &updates)?;
    Ok(report)
}

/// Stage C: write canonical row values back into each document's sections,
/// coercing NULL to the empty string. Unchanged documents are left alone,
/// so re-running against an unchanged store is a no-op.
fn backpropagate(gateway: &mut Gateway, docs: &mut SidecarSet) -> Result<BackpropReport, EtlError> {
    let mut report = BackpropReport::default();

    for (path, document) in docs.iter_mut() {
        report.documents += 1;
        let Some(identity) = document.file_id() else {
            tracing::warn!(path = %path.display(), "document has no usable file_id, skipped");
            continue;
        };
        let identity_value = ColumnValue::Text(identity.to_string());

        let before = document.to_value();
        for section in Section::ALL {
            if !document.has_section(section) {
                continue;
            }
            let (rows, exists) = gateway.find_rows(
                section.as_str(),
                &[Filter::eq("file_id", identity_value.clone())],
            )?;

            let row = if exists {
                pick_row(section, &rows, document.section(section))
            } else {
                None
            };

            let Some(fields) = document.section_mut(section) else {
                continue;
            };
            match row {
                Some(row) => {
                    for (column, value) in row {
                        fields.insert(column.clone(), value.to_document_json());
                    }
                }
                None => {
                    report.missing_rows += 1;
                    tracing::warn!(
                        path = %path.display(),
                        table = section.as_str(),
                        "no canonical row for this section, writing empty values"
                    );
                    for value in fields.values_mut() {
                        *value = Value::String(String::new());
                    }
                }
            }
        }

        if document.to_value() != before {
            docs::write_document(path, document)?;
            report.rewritten += 1;
        }
    }

    Ok(report)
}

/// Duplicate file contents are legal: `files` is keyed by identity plus
/// path and `transformations` by a composite natural key, so several rows
/// can share one `file_id`. Prefer the row whose non-identity key columns
/// match what the section already carries.
fn pick_row<'a>(
    section: Section,
    rows: &'a [Row],
    fields: Option<&BTreeMap<String, Value>>,
) -> Option<&'a Row> {
    let key_columns: &[&str] = match section {
        Section::Files => &["file_path"],
        Section::Transformations => &["target_id", "transform_id"],
        Section::Bids | Section::Labels => &[],
    };
    if !key_columns.is_empty()
        && let Some(fields) = fields
        && let Some(row) = rows.iter().find(|row| {
            key_columns.iter().all(|column| {
                match (
                    fields.get(*column).and_then(Value::as_str),
                    row.get(*column).and_then(ColumnValue::as_text),
                ) {
                    (Some(want), Some(have)) => want == have,
                    _ => false,
                }
            })
        })
    {
        return Some(row);
    }
    rows.first()
}

fn file_key(file: &Row) -> Row {
    let mut key = Row::new();
    for column in ["file_id", "file_path"] {
        key.insert(
            column.to_string(),
            file.get(column).cloned().unwrap_or(ColumnValue::Null),
        );
    }
    key
}
