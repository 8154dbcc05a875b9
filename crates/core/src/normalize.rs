#![forbid(unsafe_code)]

/// Normalizes an external subject identifier for matching: separators
/// (`-`, `_`) stripped, uppercased. Idempotent by construction.
pub fn subject_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| *ch != '-' && *ch != '_')
        .collect::<String>()
        .trim()
        .to_uppercase()
}

/// Extracts the normalized subject key from a file path whose basename
/// follows the `sub-<token>_...` convention.
pub fn subject_key_from_path(path: &str) -> Option<String> {
    let basename = path.rsplit('/').next()?;
    let token = basename.split('_').next()?;
    let token = token.strip_prefix("sub-").unwrap_or(token).trim();
    if token.is_empty() {
        return None;
    }
    Some(subject_key(token))
}
