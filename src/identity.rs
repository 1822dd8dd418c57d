//!
//! src/identity.rs
//!
//! Derives the stable identity a track is keyed by across runs. The
//! store is reloaded fresh every run, so the digest has to come out
//! identical for the same descriptive fields every time.
//!

use sha2::{Digest, Sha256};

/// Hex SHA-256 digest over the normalized descriptive fields of a track.
/// This is the primary key for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity(pub String);

impl std::fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and case-fold only. Deliberately no "feat." stripping or
/// diacritic folding; punctuation and internal whitespace stay
/// significant, so near-duplicates get distinct identities.
pub fn normalize_field(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Builds the identity from title, artist, album and the raw scraped
/// year string. The year is taken unparsed so a malformed year still
/// yields a stable key. Each field is length-prefixed before hashing
/// so adjacent fields cannot collide across their boundary
/// ("ab"+"c" vs "a"+"bc").
pub fn derive_identity(title: &str, artist: &str, album: &str, year: &str)
    -> TrackIdentity {

    let mut hasher = Sha256::new();
    for field in [title, artist, album, year] {
        let norm = normalize_field(field);
        hasher.update((norm.len() as u64).to_le_bytes());
        hasher.update(norm.as_bytes());
    }

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    TrackIdentity(hex)
}
