//! Manifest hash algorithms and digest bags (spec.md §3, §4.1, §4.2).

use std::collections::BTreeMap;
use std::fmt;

use data_encoding::{BASE32_NOPAD, HEXLOWER, HEXUPPER};
use serde::{Deserialize, Serialize};

/// A supported manifest hash algorithm, in strongest-first order for
/// [`ManifestDigest::best`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// The original algorithm: SHA-1 over a manifest that doesn't include
    /// mtimes. Kept only for reading very old feeds.
    Sha1New,
    /// SHA-256, digest rendered as uppercase base16 (hex).
    Sha256,
    /// SHA-256, digest rendered as lowercase base32 without padding —
    /// the current preferred format.
    Sha256New,
}

impl ManifestFormat {
    /// The algorithm name exactly as it appears as the prefix of a store
    /// directory name (`sha1new=...`, `sha256=...`, `sha256new_...`).
    pub fn algorithm_name(self) -> &'static str {
        match self {
            ManifestFormat::Sha1New => "sha1new",
            ManifestFormat::Sha256 => "sha256",
            ManifestFormat::Sha256New => "sha256new",
        }
    }

    /// The separator between algorithm name and digest in a store
    /// directory name: `=` for every format except `sha256new`, which
    /// uses `_` because `=` isn't valid in a base32 alphabet-adjacent
    /// context on some filesystems.
    pub fn directory_separator(self) -> char {
        match self {
            ManifestFormat::Sha256New => '_',
            _ => '=',
        }
    }

    /// Parse an algorithm name back from a store directory prefix.
    pub fn parse(name: &str) -> Option<ManifestFormat> {
        match name {
            "sha1new" => Some(ManifestFormat::Sha1New),
            "sha256" => Some(ManifestFormat::Sha256),
            "sha256new" => Some(ManifestFormat::Sha256New),
            _ => None,
        }
    }

    /// Render raw hash bytes in this format's digest encoding: hex for
    /// `sha1new`, lowercase unpadded base32 for `sha256new`, uppercase
    /// base16 for `sha256` (spec.md §4.1). The hash itself is computed by
    /// the caller (`zeroinstall-engine`, which owns the `sha1`/`sha2`
    /// dependency); this crate only owns the text encoding so the two
    /// stay in lockstep with the store-directory-name grammar above.
    pub fn encode(self, hash: &[u8]) -> String {
        match self {
            ManifestFormat::Sha1New => HEXLOWER.encode(hash),
            ManifestFormat::Sha256New => BASE32_NOPAD.encode(hash).to_ascii_lowercase(),
            ManifestFormat::Sha256 => HEXUPPER.encode(hash),
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_name())
    }
}

/// A bag of `(algorithm, digest)` pairs identifying the same directory
/// tree's contents under each algorithm it was hashed with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDigest {
    entries: BTreeMap<ManifestFormat, String>,
}

impl ManifestDigest {
    /// An empty digest bag.
    pub fn new() -> Self {
        ManifestDigest::default()
    }

    /// Record a digest for `format`, overwriting any previous value.
    pub fn insert(&mut self, format: ManifestFormat, digest: String) {
        self.entries.insert(format, digest);
    }

    /// The digest string for a specific algorithm, if present.
    pub fn get(&self, format: ManifestFormat) -> Option<&str> {
        self.entries.get(&format).map(String::as_str)
    }

    /// The strongest algorithm present, preferring
    /// `sha256new > sha256 > sha1new` (spec.md §3), paired with its digest.
    pub fn best(&self) -> Option<(ManifestFormat, &str)> {
        [
            ManifestFormat::Sha256New,
            ManifestFormat::Sha256,
            ManifestFormat::Sha1New,
        ]
        .into_iter()
        .find_map(|fmt| self.get(fmt).map(|d| (fmt, d)))
    }

    /// The `<algorithm><sep><digest>` store directory name for the best
    /// available algorithm.
    pub fn best_store_name(&self) -> Option<String> {
        let (format, digest) = self.best()?;
        Some(format!(
            "{}{}{}",
            format.algorithm_name(),
            format.directory_separator(),
            digest
        ))
    }

    /// Parse a store directory name (`sha256new_ABC...` or `sha1new=abc...`)
    /// into its format and digest.
    pub fn parse_store_name(name: &str) -> Option<(ManifestFormat, &str)> {
        for format in [
            ManifestFormat::Sha256New,
            ManifestFormat::Sha256,
            ManifestFormat::Sha1New,
        ] {
            let prefix = format.algorithm_name();
            let sep = format.directory_separator();
            if let Some(rest) = name.strip_prefix(prefix) {
                if let Some(digest) = rest.strip_prefix(sep) {
                    return Some((format, digest));
                }
            }
        }
        None
    }

    /// Iterate all `(algorithm, digest)` pairs, strongest first.
    pub fn iter(&self) -> impl Iterator<Item = (ManifestFormat, &str)> {
        self.entries.iter().rev().map(|(f, d)| (*f, d.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_prefers_sha256new() {
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha1New, "abc123".into());
        digest.insert(ManifestFormat::Sha256, "DEF456".into());
        assert_eq!(digest.best().unwrap().0, ManifestFormat::Sha256);

        digest.insert(ManifestFormat::Sha256New, "ghijkl".into());
        assert_eq!(digest.best().unwrap().0, ManifestFormat::Sha256New);
    }

    #[test]
    fn store_name_round_trips() {
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha256New, "abcdefgh".into());
        let name = digest.best_store_name().unwrap();
        assert_eq!(name, "sha256new_abcdefgh");
        let (format, raw) = ManifestDigest::parse_store_name(&name).unwrap();
        assert_eq!(format, ManifestFormat::Sha256New);
        assert_eq!(raw, "abcdefgh");
    }

    #[test]
    fn encode_matches_format_conventions() {
        let hash = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(ManifestFormat::Sha1New.encode(&hash), "deadbeef");
        assert_eq!(ManifestFormat::Sha256.encode(&hash), "DEADBEEF");

        let base32 = ManifestFormat::Sha256New.encode(&hash);
        assert!(base32.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(!base32.contains('='));
        assert_eq!(base32, base32.to_ascii_lowercase());
    }

    #[test]
    fn sha1_uses_equals_separator() {
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha1New, "deadbeef".into());
        assert_eq!(digest.best_store_name().unwrap(), "sha1new=deadbeef");
    }
}
