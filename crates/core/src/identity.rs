#![forbid(unsafe_code)]

use sha2::Digest as _;
use std::fmt::Write as _;
use std::io::Read as _;
use std::path::Path;

/// Content-based identity of a data file: lowercase hex SHA-256 of its raw
/// bytes. Two files with identical bytes produce identical identities no
/// matter where they live.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentity(String);

impl FileIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(bytes);
        Self(hex_digest(hasher))
    }

    pub fn of_file(path: &Path) -> Result<Self, std::io::Error> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        let mut hasher = sha2::Sha256::new();

        let mut buf = [0u8; 16 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Self(hex_digest(hasher)))
    }

    /// Accepts an identity that was stored in a sidecar document or a row.
    /// Only the shape is validated; the hash itself is opaque.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != 64 {
            return None;
        }
        if !value.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_digest(hasher: sha2::Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_depends_on_content_only() {
        let dir = std::env::temp_dir().join(format!("sdb_identity_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let a = dir.join("a.nii.gz");
        let b = dir.join("nested_b.nii.gz");
        std::fs::write(&a, b"same bytes").expect("write a");
        std::fs::write(&b, b"same bytes").expect("write b");

        let id_a = FileIdentity::of_file(&a).expect("hash a");
        let id_b = FileIdentity::of_file(&b).expect("hash b");
        assert_eq!(id_a, id_b);
        assert_eq!(id_a, FileIdentity::of_bytes(b"same bytes"));

        // Re-hashing is stable.
        assert_eq!(id_a, FileIdentity::of_file(&a).expect("rehash a"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn different_bytes_differ() {
        assert_ne!(
            FileIdentity::of_bytes(b"alpha"),
            FileIdentity::of_bytes(b"beta")
        );
    }

    #[test]
    fn parse_accepts_stored_digests() {
        let id = FileIdentity::of_bytes(b"x");
        let parsed = FileIdentity::parse(id.as_str()).expect("parse");
        assert_eq!(parsed, id);
        assert!(FileIdentity::parse("not-a-digest").is_none());
        assert!(FileIdentity::parse("").is_none());
    }
}
