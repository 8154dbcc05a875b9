#![forbid(unsafe_code)]

use crate::error::EtlError;
use crate::extract::ExtractedRecord;
use sdb_core::mapping::{self, MappingTable, ResolveError};
use sdb_core::{ColumnValue, Section};
use sdb_storage::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One parameterized table-row write intent. Values travel as structured
/// data and are bound as parameters at load time, never rendered into SQL
/// text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RowWrite {
    pub table: String,
    pub values: Row,
}

/// The grouped sibling writes of one source record. Grouping is preserved
/// through the persisted script; ordering across records carries no
/// meaning.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordWrites {
    pub source: PathBuf,
    pub writes: Vec<RowWrite>,
}

/// Immutable per-run rule sets, one table per destination. `files` and
/// `bids` are required; `labels` and `transformations` only apply to
/// documents carrying those sections.
#[derive(Clone, Debug)]
pub struct MappingSet {
    tables: BTreeMap<Section, MappingTable>,
}

impl MappingSet {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, section: Section, table: MappingTable) {
        self.tables.insert(section, table);
    }

    pub fn get(&self, section: Section) -> Option<&MappingTable> {
        self.tables.get(&section)
    }

    /// Loads `<table>.csv` rule files from the mapping directory. Missing
    /// `files`/`bids` tables are a configuration error; the optional two
    /// may be absent.
    pub fn load_dir(dir: &Path) -> Result<Self, EtlError> {
        let mut set = Self::new();
        for section in Section::ALL {
            let path = dir.join(format!("{}.csv", section.as_str()));
            if !path.exists() {
                if matches!(section, Section::Files | Section::Bids) {
                    return Err(EtlError::Config(format!(
                        "required mapping table missing: {}",
                        path.display()
                    )));
                }
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            let table = MappingTable::parse(&text)?;
            if table.is_empty() {
                return Err(EtlError::Config(format!(
                    "mapping table has no rules: {}",
                    path.display()
                )));
            }
            set.insert(section, table);
        }
        Ok(set)
    }
}

impl Default for MappingSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves every record against the mapping set on a fixed-width worker
/// pool. Records are independent; each one's sibling writes stay grouped.
pub fn transform(
    records: &[ExtractedRecord],
    mappings: &MappingSet,
    workers: usize,
) -> Result<Vec<RecordWrites>, EtlError> {
    if records.is_empty() {
        return Err(EtlError::EmptyInput("records to transform"));
    }

    let workers = workers.clamp(1, records.len());
    let chunk_size = records.len().div_ceil(workers);
    let mut out = Vec::with_capacity(records.len());

    std::thread::scope(|scope| {
        let handles: Vec<_> = records
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|record| transform_record(record, mappings))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            // A panic here is a bug in the resolver, not a data error.
            out.extend(handle.join().expect("transform worker panicked"));
        }
    });

    tracing::info!(records = out.len(), "transform finished");
    Ok(out)
}

fn transform_record(record: &ExtractedRecord, mappings: &MappingSet) -> RecordWrites {
    let mut writes = Vec::new();
    for section in Section::ALL {
        let Some(table) = mappings.get(section) else {
            continue;
        };
        let required = matches!(section, Section::Files | Section::Bids);
        if !required && !record.sections.contains(&section) {
            continue;
        }
        writes.push(emit_row(section, table, record));
    }
    RecordWrites {
        source: record.source_path.clone(),
        writes,
    }
}

/// The Row Emitter: resolves each rule, substitutes `NULL` for per-value
/// failures, and normalizes empty/NaN values to the relational NULL.
fn emit_row(section: Section, table: &MappingTable, record: &ExtractedRecord) -> RowWrite {
    let mut values = Row::new();
    for rule in table.rules() {
        let resolved = match mapping::resolve(rule, &record.record) {
            Ok(value) => value,
            Err(ResolveError::MissingField(field)) => {
                tracing::warn!(
                    source = %record.source_path.display(),
                    table = section.as_str(),
                    attribute = %rule.attribute,
                    field = %field,
                    "source field missing, substituting NULL"
                );
                ColumnValue::Null
            }
            Err(ResolveError::EvalFailed { template, reason }) => {
                tracing::warn!(
                    source = %record.source_path.display(),
                    table = section.as_str(),
                    attribute = %rule.attribute,
                    template = %template,
                    reason = %reason,
                    "expression failed, substituting NULL"
                );
                ColumnValue::Null
            }
        };
        values.insert(rule.attribute.clone(), resolved.normalized());
    }
    RowWrite {
        table: section.as_str().to_string(),
        values,
    }
}
