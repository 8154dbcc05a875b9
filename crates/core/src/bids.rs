#![forbid(unsafe_code)]

//! Entity parsing for filenames following the `key-value` underscore
//! convention, e.g. `sub-CF07_ses-Pre_acq-stereo_R-STN_label.nii.gz`.

/// Entities extracted from a single filename. Absent entities are `None`;
/// hemisphere/structure only apply to label files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BidsName {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub acquisition: Option<String>,
    pub suffix: Option<String>,
    pub extension: Option<String>,
    pub hemisphere: Option<String>,
    pub structure: Option<String>,
}

impl BidsName {
    pub fn parse(file_name: &str, is_label: bool) -> Self {
        let basename = file_name.rsplit('/').next().unwrap_or(file_name);
        let parts: Vec<&str> = basename.split('_').collect();
        let mut name = BidsName::default();

        for part in &parts[..parts.len().saturating_sub(1)] {
            if let Some(value) = part.strip_prefix("sub-") {
                name.subject = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("ses-") {
                name.session = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("acq-") {
                name.acquisition = Some(value.to_string());
            }
        }

        if let Some(last) = parts.last() {
            match last.split_once('.') {
                Some((suffix, extension)) => {
                    if !suffix.is_empty() {
                        name.suffix = Some(suffix.to_string());
                    }
                    name.extension = Some(extension.to_string());
                }
                None => {
                    if !last.is_empty() {
                        name.suffix = Some(last.to_string());
                    }
                }
            }
        }

        if is_label && parts.len() >= 2 {
            let marker = parts[parts.len() - 2];
            if let Some((hemisphere, structure)) = marker.split_once('-') {
                name.hemisphere = Some(hemisphere.to_string());
                name.structure = Some(structure.to_string());
            }
        }

        name
    }
}

/// Basename of a path with every extension stripped; the lookup key Stage B
/// uses to match transformation targets.
pub fn base_key(path: &str) -> String {
    let basename = path.rsplit('/').next().unwrap_or(path);
    basename
        .split_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_entities() {
        let name = BidsName::parse("sub-CF07_ses-Pre_acq-stereo_T1w.nii.gz", false);
        assert_eq!(name.subject.as_deref(), Some("CF07"));
        assert_eq!(name.session.as_deref(), Some("Pre"));
        assert_eq!(name.acquisition.as_deref(), Some("stereo"));
        assert_eq!(name.suffix.as_deref(), Some("T1w"));
        assert_eq!(name.extension.as_deref(), Some("nii.gz"));
        assert!(name.hemisphere.is_none());
    }

    #[test]
    fn labels_carry_hemisphere_and_structure() {
        let name = BidsName::parse("sub-CF07_ses-Pre_R-STN_label.nii.gz", true);
        assert_eq!(name.hemisphere.as_deref(), Some("R"));
        assert_eq!(name.structure.as_deref(), Some("STN"));
        assert_eq!(name.suffix.as_deref(), Some("label"));
    }

    #[test]
    fn base_key_strips_directories_and_extensions() {
        assert_eq!(
            base_key("derivatives/sub-CF07/sub-CF07_warp.nii.gz"),
            "sub-CF07_warp"
        );
        assert_eq!(base_key("plain"), "plain");
    }
}
