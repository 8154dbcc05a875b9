#![forbid(unsafe_code)]

use crate::error::EtlError;
use crate::transform::RecordWrites;
use sdb_storage::{Gateway, UpsertOutcome};

/// Outcome of one load run. A failed write is skipped and counted, never
/// fatal; callers decide what a non-zero `failed` means for the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub attempted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub already_existing: usize,
    pub failed: usize,
}

/// Executes the write script as one batch of natural-key upserts. Existing
/// rows are left untouched (`allow_update = false`), which makes re-running
/// the load a no-op.
pub fn load(gateway: &mut Gateway, batches: &[RecordWrites]) -> Result<LoadReport, EtlError> {
    if batches.is_empty() {
        return Err(EtlError::EmptyInput("write script"));
    }

    let mut report = LoadReport::default();
    for batch in batches {
        for write in &batch.writes {
            report.attempted += 1;
            match gateway.upsert(&write.table, &write.values, false) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::AlreadyExists) => report.already_existing += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        source = %batch.source.display(),
                        table = %write.table,
                        error = %err,
                        "row write failed, skipped"
                    );
                }
            }
        }
    }

    for (table, count) in gateway.row_counts()? {
        tracing::info!(table = %table, rows = count, "data check");
    }
    tracing::info!(
        attempted = report.attempted,
        inserted = report.inserted,
        updated = report.updated,
        already_existing = report.already_existing,
        failed = report.failed,
        "load finished"
    );
    Ok(report)
}
