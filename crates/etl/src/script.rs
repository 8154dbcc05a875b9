#![forbid(unsafe_code)]

use crate::error::EtlError;
use crate::transform::RecordWrites;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// Persists the write script as JSON lines, one record group per line, so
/// the load stage can consume the whole batch independently of the
/// transform run.
pub fn write_script(path: &Path, batches: &[RecordWrites]) -> Result<(), EtlError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for batch in batches {
        serde_json::to_writer(&mut writer, batch)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_script(path: &Path) -> Result<Vec<RecordWrites>, EtlError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut batches = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        batches.push(serde_json::from_str(&line)?);
    }
    Ok(batches)
}
