#![forbid(unsafe_code)]

use crate::identity::FileIdentity;
use serde_json::Value;
use std::collections::BTreeMap;

/// The four named sections a sidecar document may carry. Section names
/// double as the destination table names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Files,
    Bids,
    Labels,
    Transformations,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Files,
        Section::Bids,
        Section::Labels,
        Section::Transformations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Files => "files",
            Section::Bids => "bids",
            Section::Labels => "labels",
            Section::Transformations => "transformations",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "files" => Some(Section::Files),
            "bids" => Some(Section::Bids),
            "labels" => Some(Section::Labels),
            "transformations" => Some(Section::Transformations),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentError {
    NotAnObject,
    SectionNotFlat(&'static str),
    UnknownSection(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "sidecar document must be a JSON object"),
            Self::SectionNotFlat(section) => {
                write!(f, "section `{section}` must be a flat JSON object")
            }
            Self::UnknownSection(name) => write!(f, "unknown section `{name}`"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// One sidecar document: up to four flat attribute sections, every present
/// section carrying the same `file_id` content hash.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SidecarDocument {
    sections: BTreeMap<Section, BTreeMap<String, Value>>,
}

impl SidecarDocument {
    pub fn from_value(value: &Value) -> Result<Self, DocumentError> {
        let Some(object) = value.as_object() else {
            return Err(DocumentError::NotAnObject);
        };

        let mut sections = BTreeMap::new();
        for (name, body) in object {
            let Some(section) = Section::parse(name) else {
                return Err(DocumentError::UnknownSection(name.clone()));
            };
            let Some(fields) = body.as_object() else {
                return Err(DocumentError::SectionNotFlat(section.as_str()));
            };
            let mut flat = BTreeMap::new();
            for (key, field) in fields {
                if field.is_object() || field.is_array() {
                    return Err(DocumentError::SectionNotFlat(section.as_str()));
                }
                flat.insert(key.clone(), field.clone());
            }
            sections.insert(section, flat);
        }

        Ok(Self { sections })
    }

    pub fn to_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (section, fields) in &self.sections {
            let mut body = serde_json::Map::new();
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
            object.insert(section.as_str().to_string(), Value::Object(body));
        }
        Value::Object(object)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn has_section(&self, section: Section) -> bool {
        self.sections.contains_key(&section)
    }

    pub fn section(&self, section: Section) -> Option<&BTreeMap<String, Value>> {
        self.sections.get(&section)
    }

    pub fn section_mut(&mut self, section: Section) -> Option<&mut BTreeMap<String, Value>> {
        self.sections.get_mut(&section)
    }

    pub fn insert_section(&mut self, section: Section, fields: BTreeMap<String, Value>) {
        self.sections.insert(section, fields);
    }

    pub fn sections_present(&self) -> impl Iterator<Item = Section> + '_ {
        self.sections.keys().copied()
    }

    /// The document's content hash, read from whichever section carries a
    /// well-formed `file_id`.
    pub fn file_id(&self) -> Option<FileIdentity> {
        for section in Section::ALL {
            if let Some(fields) = self.sections.get(&section)
                && let Some(value) = fields.get("file_id").and_then(Value::as_str)
                && let Some(identity) = FileIdentity::parse(value)
            {
                return Some(identity);
            }
        }
        None
    }

    /// Flattens all sections into one source record for mapping. The first
    /// section to define an attribute wins, so `files` stays canonical for
    /// shared keys like `file_id`.
    pub fn record(&self) -> BTreeMap<String, Value> {
        let mut record = BTreeMap::new();
        for section in Section::ALL {
            if let Some(fields) = self.sections.get(&section) {
                for (key, value) in fields {
                    record.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        record
    }
}
