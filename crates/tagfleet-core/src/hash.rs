//! Content-addressed hashing of a model directory's manifest.
//!
//! Hashing itself is pure: callers collect `(relative_path, size)` pairs by
//! walking the models directory (IO lives in the supervisor/probe crates)
//! and this module folds them into a stable identifier. Any change to a
//! model file's size or the set of files present changes the hash.

use sha2::{Digest, Sha256};

/// One file's contribution to the model-set manifest: its path relative to
/// the models directory, and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size_bytes: u64,
}

/// Fold a model directory's manifest into a short, stable hash.
///
/// Entries are sorted by relative path before hashing so the result does not
/// depend on filesystem iteration order. Each entry contributes
/// `"{relative_path}:{size_bytes}\n"` to the digest. Returns the first 16 hex
/// characters of the SHA-256 digest.
#[must_use]
pub fn compute_model_set_hash(entries: &[ManifestEntry]) -> String {
    let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.relative_path.as_bytes());
        hasher.update(b":");
        hasher.update(entry.size_bytes.to_string().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// Fallback hash for when the models directory cannot be walked (permission
/// error, missing directory). Seeded from a caller-supplied timestamp so
/// repeated failures at different times don't collide, while still being
/// deterministic for a fixed timestamp in tests.
#[must_use]
pub fn fallback_hash(seed_wall_ms: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"model-set-probe-fallback:");
    hasher.update(seed_wall_ms.to_string().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for byte in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{byte:02x}"));
    }
    s.truncate(chars);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64) -> ManifestEntry {
        ManifestEntry {
            relative_path: path.to_string(),
            size_bytes: size,
        }
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let hash = compute_model_set_hash(&[entry("backbone.pb", 1024)]);
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_order_independent() {
        let a = compute_model_set_hash(&[entry("b.pb", 10), entry("a.pb", 20)]);
        let b = compute_model_set_hash(&[entry("a.pb", 20), entry("b.pb", 10)]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_size_changes_hash() {
        let a = compute_model_set_hash(&[entry("backbone.pb", 1024)]);
        let b = compute_model_set_hash(&[entry("backbone.pb", 2048)]);
        assert_ne!(a, b);
    }

    #[test]
    fn different_file_set_changes_hash() {
        let a = compute_model_set_hash(&[entry("backbone.pb", 1024)]);
        let b = compute_model_set_hash(&[entry("backbone.pb", 1024), entry("head.json", 512)]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_manifest_is_stable() {
        let a = compute_model_set_hash(&[]);
        let b = compute_model_set_hash(&[]);
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_hash_is_deterministic_for_fixed_seed() {
        assert_eq!(fallback_hash(12345), fallback_hash(12345));
        assert_ne!(fallback_hash(12345), fallback_hash(12346));
    }
}
