#![forbid(unsafe_code)]

use sdb_etl::EtlError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_workers() -> usize {
    4
}

/// Workflow configuration, loaded from a JSON file before any stage runs.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root of the document tree to walk for `*_sidecar.json` files.
    pub data_dir: PathBuf,
    /// Where the extraction artifact and the write script land.
    pub extraction_dir: PathBuf,
    /// Directory of per-table mapping files (`<table>.csv`).
    pub mapping_dir: PathBuf,
    pub db_path: PathBuf,
    /// Optional schema script; the built-in schema is used when absent.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Drop all user tables before installing the schema.
    #[serde(default)]
    pub wipe_db: bool,
    #[serde(default)]
    pub skip_extraction: bool,
    #[serde(default)]
    pub skip_transform: bool,
    #[serde(default)]
    pub skip_loading: bool,
    #[serde(default)]
    pub skip_reconciliation: bool,
    #[serde(default)]
    pub run_backpropagation: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, EtlError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| EtlError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EtlError> {
        if self.workers == 0 {
            return Err(EtlError::Config("workers must be at least 1".to_string()));
        }
        if !self.data_dir.is_dir() {
            return Err(EtlError::Config(format!(
                "data_dir {} is not a directory",
                self.data_dir.display()
            )));
        }
        if !self.mapping_dir.is_dir() {
            return Err(EtlError::Config(format!(
                "mapping_dir {} is not a directory",
                self.mapping_dir.display()
            )));
        }
        if let Some(schema) = &self.schema_path
            && !schema.is_file()
        {
            return Err(EtlError::Config(format!(
                "schema_path {} is not a file",
                schema.display()
            )));
        }
        // Without extraction there are no in-memory records, so a transform
        // run has nothing to resolve.
        if self.skip_extraction && !self.skip_transform {
            return Err(EtlError::Config(
                "skip_extraction requires skip_transform".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(test_name: &str) -> PathBuf {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = base.join(format!("sdb_config_{test_name}_{pid}_{nonce}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let dir = temp_dir("minimal");
        std::fs::create_dir_all(dir.join("data")).expect("data dir");
        std::fs::create_dir_all(dir.join("mappings")).expect("mapping dir");
        let path = write_config(
            &dir,
            &format!(
                r#"{{
                    "data_dir": "{0}/data",
                    "extraction_dir": "{0}/out",
                    "mapping_dir": "{0}/mappings",
                    "db_path": "{0}/sidecar.db"
                }}"#,
                dir.display()
            ),
        );

        let config = Config::load(&path).expect("load");
        assert_eq!(config.workers, 4);
        assert!(!config.wipe_db);
        assert!(!config.run_backpropagation);
        assert!(config.schema_path.is_none());
    }

    #[test]
    fn unreadable_config_is_a_config_error() {
        let dir = temp_dir("unreadable");
        let err = Config::load(&dir.join("missing.json")).expect_err("must fail");
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn skipping_extraction_but_not_transform_is_rejected() {
        let dir = temp_dir("skip_combination");
        std::fs::create_dir_all(dir.join("data")).expect("data dir");
        std::fs::create_dir_all(dir.join("mappings")).expect("mapping dir");
        let path = write_config(
            &dir,
            &format!(
                r#"{{
                    "data_dir": "{0}/data",
                    "extraction_dir": "{0}/out",
                    "mapping_dir": "{0}/mappings",
                    "db_path": "{0}/sidecar.db",
                    "skip_extraction": true
                }}"#,
                dir.display()
            ),
        );

        let err = Config::load(&path).expect_err("must fail");
        assert!(matches!(err, EtlError::Config(_)));
    }
}
