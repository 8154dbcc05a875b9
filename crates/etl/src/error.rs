#![forbid(unsafe_code)]

use sdb_core::mapping::MappingParseError;
use sdb_storage::StoreError;

#[derive(Debug)]
pub enum EtlError {
    /// Bad paths or missing required settings; aborts before any stage.
    Config(String),
    /// A required input set or table is empty; aborts the current stage.
    EmptyInput(&'static str),
    Io(std::io::Error),
    Json(serde_json::Error),
    Store(StoreError),
    Mapping(MappingParseError),
}

impl std::fmt::Display for EtlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(message) => write!(f, "configuration: {message}"),
            Self::EmptyInput(what) => write!(f, "empty required input: {what}"),
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::Store(err) => write!(f, "store: {err}"),
            Self::Mapping(err) => write!(f, "mapping table: {err}"),
        }
    }
}

impl std::error::Error for EtlError {}

impl From<std::io::Error> for EtlError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<StoreError> for EtlError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<MappingParseError> for EtlError {
    fn from(value: MappingParseError) -> Self {
        Self::Mapping(value)
    }
}
