#![forbid(unsafe_code)]

use sdb_etl::EtlError;
use std::path::{Path, PathBuf};

/// Collects every `*_sidecar.json` under `root`, sorted for a stable
/// processing order across runs.
pub fn sidecar_files(root: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let mut out = Vec::new();
    collect(root, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EtlError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect(&path, out)?;
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with("_sidecar.json"))
        {
            out.push(path);
        }
    }
    Ok(())
}
