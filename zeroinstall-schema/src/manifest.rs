//! The canonical in-memory directory tree and its line-grammar
//! serialization (spec.md §4.1).
//!
//! This is the pure data half of the Manifest Engine: it knows how to turn
//! a tree of [`ManifestEntry`] values into the exact byte sequence that
//! gets hashed, and nothing about reading a real filesystem. Walking an
//! actual directory, computing file digests, and applying the hash
//! function live in `zeroinstall-engine`'s builder, which populates one of
//! these and hands it back here for serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry in a manifest directory: a file, executable, symlink, or a
/// marker that a subdirectory exists at this name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestEntry {
    /// A regular file.
    NormalFile {
        /// Content digest, in the Manifest's chosen format's text encoding.
        digest: String,
        /// Seconds since the Unix epoch.
        mtime: i64,
        /// Size in bytes.
        size: u64,
    },
    /// A file with the executable bit set.
    ExecutableFile {
        /// See [`ManifestEntry::NormalFile::digest`].
        digest: String,
        /// See [`ManifestEntry::NormalFile::mtime`].
        mtime: i64,
        /// See [`ManifestEntry::NormalFile::size`].
        size: u64,
    },
    /// A symlink; digest is computed over the UTF-8 bytes of its target.
    Symlink {
        /// Digest of the target path bytes.
        digest: String,
        /// Length of the target path in bytes.
        size: u64,
    },
    /// Marks that a subdirectory exists at this name. Its own contents are
    /// a separate entry in [`Manifest`] keyed by the child's full path.
    Directory,
}

/// A path was rejected by a [`Manifest`] mutation: it contained a
/// newline, NUL byte, or used one of the two reserved control file names.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Path contains a control character the line grammar can't represent.
    #[error("invalid path {0:?}: manifest entries may not contain newline or NUL bytes")]
    BadPath(String),
    /// `.manifest` and `.xbit` are reserved store control files.
    #[error("{0:?} is a reserved manifest control file name")]
    ReservedName(String),
    /// An entry already exists at this path and overwrite wasn't requested.
    #[error("an entry already exists at {0:?}")]
    Conflict(String),
    /// `add_hardlink` referenced a source path with no existing entry.
    #[error("hardlink source {0:?} does not exist")]
    NotFound(String),
}

const RESERVED_NAMES: &[&str] = &[".manifest", ".xbit"];

fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.contains('\n') || name.contains('\0') || name.contains('/') {
        return Err(ManifestError::BadPath(name.to_owned()));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ManifestError::ReservedName(name.to_owned()));
    }
    Ok(())
}

fn parent_and_name(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// A deterministic serialization of a directory tree: a map from
/// slash-separated POSIX directory path (`""` for the root) to the
/// entries it directly contains.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    dirs: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
}

impl Manifest {
    /// An empty tree containing only the root directory.
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(String::new(), BTreeMap::new());
        Manifest { dirs }
    }

    /// Create `path` as a directory. Ancestor directories not already
    /// present are created implicitly.
    pub fn add_directory(&mut self, path: &str) -> Result<(), ManifestError> {
        if path.is_empty() {
            return Ok(());
        }
        let (parent, name) = parent_and_name(path);
        validate_name(name)?;
        if !self.dirs.contains_key(parent) {
            self.add_directory(parent)?;
        }
        let entries = self.dirs.entry(parent.to_owned()).or_default();
        match entries.get(name) {
            Some(ManifestEntry::Directory) => {}
            Some(_) => return Err(ManifestError::Conflict(path.to_owned())),
            None => {
                entries.insert(name.to_owned(), ManifestEntry::Directory);
            }
        }
        self.dirs.entry(path.to_owned()).or_default();
        Ok(())
    }

    /// Insert a file entry (already hashed by the caller) at `path`.
    pub fn add_file(
        &mut self,
        path: &str,
        digest: String,
        mtime: i64,
        size: u64,
        executable: bool,
        overwrite: bool,
    ) -> Result<(), ManifestError> {
        let (parent, name) = parent_and_name(path);
        validate_name(name)?;
        if !self.dirs.contains_key(parent) {
            self.add_directory(parent)?;
        }
        let entries = self.dirs.entry(parent.to_owned()).or_default();
        if entries.contains_key(name) && !overwrite {
            return Err(ManifestError::Conflict(path.to_owned()));
        }
        let entry = if executable {
            ManifestEntry::ExecutableFile { digest, mtime, size }
        } else {
            ManifestEntry::NormalFile { digest, mtime, size }
        };
        entries.insert(name.to_owned(), entry);
        Ok(())
    }

    /// Insert a symlink entry at `path`.
    pub fn add_symlink(
        &mut self,
        path: &str,
        digest: String,
        size: u64,
        overwrite: bool,
    ) -> Result<(), ManifestError> {
        let (parent, name) = parent_and_name(path);
        validate_name(name)?;
        if !self.dirs.contains_key(parent) {
            self.add_directory(parent)?;
        }
        let entries = self.dirs.entry(parent.to_owned()).or_default();
        if entries.contains_key(name) && !overwrite {
            return Err(ManifestError::Conflict(path.to_owned()));
        }
        entries.insert(name.to_owned(), ManifestEntry::Symlink { digest, size });
        Ok(())
    }

    /// Add a hardlink at `dest` pointing at the same content as
    /// `existing`, which must already be a file or symlink entry.
    pub fn add_hardlink(&mut self, dest: &str, existing: &str) -> Result<(), ManifestError> {
        let (src_parent, src_name) = parent_and_name(existing);
        let entry = self
            .dirs
            .get(src_parent)
            .and_then(|entries| entries.get(src_name))
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(existing.to_owned()))?;
        let (dest_parent, dest_name) = parent_and_name(dest);
        validate_name(dest_name)?;
        if !self.dirs.contains_key(dest_parent) {
            self.add_directory(dest_parent)?;
        }
        self.dirs
            .entry(dest_parent.to_owned())
            .or_default()
            .insert(dest_name.to_owned(), entry);
        Ok(())
    }

    /// Flip the executable bit on an existing file entry.
    pub fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), ManifestError> {
        let (parent, name) = parent_and_name(path);
        let entries = self
            .dirs
            .get_mut(parent)
            .ok_or_else(|| ManifestError::NotFound(path.to_owned()))?;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ManifestError::NotFound(path.to_owned()))?;
        *entry = match std::mem::replace(entry, ManifestEntry::Directory) {
            ManifestEntry::NormalFile { digest, mtime, size }
            | ManifestEntry::ExecutableFile { digest, mtime, size } => {
                if executable {
                    ManifestEntry::ExecutableFile { digest, mtime, size }
                } else {
                    ManifestEntry::NormalFile { digest, mtime, size }
                }
            }
            other => other,
        };
        Ok(())
    }

    /// Replace a file entry at `path` with a symlink to `target`, already
    /// hashed by the caller.
    pub fn turn_into_symlink(
        &mut self,
        path: &str,
        digest: String,
        size: u64,
    ) -> Result<(), ManifestError> {
        let (parent, name) = parent_and_name(path);
        let entries = self
            .dirs
            .get_mut(parent)
            .ok_or_else(|| ManifestError::NotFound(path.to_owned()))?;
        if !entries.contains_key(name) {
            return Err(ManifestError::NotFound(path.to_owned()));
        }
        entries.insert(name.to_owned(), ManifestEntry::Symlink { digest, size });
        Ok(())
    }

    /// Remove `path`, recursively if it names a directory.
    pub fn remove(&mut self, path: &str) -> Result<(), ManifestError> {
        let (parent, name) = parent_and_name(path);
        let entries = self
            .dirs
            .get_mut(parent)
            .ok_or_else(|| ManifestError::NotFound(path.to_owned()))?;
        let removed = entries
            .remove(name)
            .ok_or_else(|| ManifestError::NotFound(path.to_owned()))?;
        if matches!(removed, ManifestEntry::Directory) {
            let prefix = format!("{path}/");
            let doomed: Vec<String> = self
                .dirs
                .keys()
                .filter(|k| k.as_str() == path || k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in doomed {
                self.dirs.remove(&key);
            }
        }
        Ok(())
    }

    /// Rename `src` to `dst`, recursively when `src` is a directory.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<(), ManifestError> {
        let (src_parent, src_name) = parent_and_name(src);
        let entry = self
            .dirs
            .get_mut(src_parent)
            .and_then(|entries| entries.remove(src_name))
            .ok_or_else(|| ManifestError::NotFound(src.to_owned()))?;
        let is_dir = matches!(entry, ManifestEntry::Directory);
        let (dst_parent, dst_name) = parent_and_name(dst);
        validate_name(dst_name)?;
        if !self.dirs.contains_key(dst_parent) {
            self.add_directory(dst_parent)?;
        }
        self.dirs
            .entry(dst_parent.to_owned())
            .or_default()
            .insert(dst_name.to_owned(), entry);

        if is_dir {
            let prefix = format!("{src}/");
            let moved: Vec<String> = self
                .dirs
                .keys()
                .filter(|k| k.as_str() == src || k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in moved {
                let suffix = key.strip_prefix(src).unwrap_or("");
                let new_key = format!("{dst}{suffix}");
                if let Some(contents) = self.dirs.remove(&key) {
                    self.dirs.insert(new_key, contents);
                }
            }
        }
        Ok(())
    }

    /// Shift every recorded mtime by `offset_secs`, used by the store to
    /// harmonize timezone discrepancies between archives (spec.md §4.1).
    pub fn time_offset(&mut self, offset_secs: i64) {
        for entries in self.dirs.values_mut() {
            for entry in entries.values_mut() {
                match entry {
                    ManifestEntry::NormalFile { mtime, .. }
                    | ManifestEntry::ExecutableFile { mtime, .. } => *mtime += offset_secs,
                    ManifestEntry::Symlink { .. } | ManifestEntry::Directory => {}
                }
            }
        }
    }

    /// Every non-directory entry, as a slash-separated path relative to
    /// the manifest root paired with its entry. Used by deployment
    /// (spec.md §4.8) to walk the set of files a stage/commit must move;
    /// directory entries are omitted since `create_dir_all` recreates
    /// them implicitly from file paths.
    pub fn file_entries(&self) -> Vec<(String, &ManifestEntry)> {
        let mut out = Vec::new();
        for (dir, entries) in &self.dirs {
            for (name, entry) in entries {
                if matches!(entry, ManifestEntry::Directory) {
                    continue;
                }
                let path = if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{dir}/{name}")
                };
                out.push((path, entry));
            }
        }
        out
    }

    /// Serialize to the canonical line-grammar byte sequence (spec.md
    /// §4.1). This is the exact input to the manifest digest hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_dir("", &mut out);
        out
    }

    fn serialize_dir(&self, path: &str, out: &mut Vec<u8>) {
        let Some(entries) = self.dirs.get(path) else {
            return;
        };
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort_by(|a, b| signed_byte_cmp(a, b));
        for name in names {
            match &entries[name] {
                ManifestEntry::Directory => {
                    let child_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}/{name}")
                    };
                    out.extend_from_slice(format!("D /{child_path}\n").as_bytes());
                    self.serialize_dir(&child_path, out);
                }
                ManifestEntry::NormalFile { digest, mtime, size } => {
                    out.extend_from_slice(format!("F {digest} {mtime} {size} {name}\n").as_bytes());
                }
                ManifestEntry::ExecutableFile { digest, mtime, size } => {
                    out.extend_from_slice(format!("X {digest} {mtime} {size} {name}\n").as_bytes());
                }
                ManifestEntry::Symlink { digest, size } => {
                    out.extend_from_slice(format!("S {digest} {size} {name}\n").as_bytes());
                }
            }
        }
    }
}

/// C's `strcmp` treats bytes as signed `char`, so byte 0x80..0xFF sorts
/// *before* ASCII rather than after it. 0install's manifest format
/// inherits this from the reference implementation; matching it exactly
/// matters because the digest is computed over these bytes.
fn signed_byte_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.bytes().map(|b| b as i8).cmp(b.bytes().map(|b| b as i8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_file_serializes() {
        let mut m = Manifest::new();
        m.add_file("hello.txt", "abc123".into(), 1_000_000, 5, false, false)
            .unwrap();
        let bytes = m.to_bytes();
        assert_eq!(bytes, b"F abc123 1000000 5 hello.txt\n");
    }

    #[test]
    fn nested_directories_are_preorder() {
        let mut m = Manifest::new();
        m.add_directory("bin").unwrap();
        m.add_file("bin/run.sh", "dig1".into(), 10, 3, true, false)
            .unwrap();
        m.add_file("README", "dig2".into(), 20, 4, false, false)
            .unwrap();
        let text = String::from_utf8(m.to_bytes()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "F dig2 20 4 README",
                "D /bin",
                "X dig1 10 3 run.sh",
            ]
        );
    }

    #[test]
    fn duplicate_without_overwrite_conflicts() {
        let mut m = Manifest::new();
        m.add_file("a", "d1".into(), 0, 0, false, false).unwrap();
        let err = m.add_file("a", "d2".into(), 0, 0, false, false).unwrap_err();
        assert!(matches!(err, ManifestError::Conflict(_)));
    }

    #[test]
    fn rejects_reserved_names() {
        let mut m = Manifest::new();
        let err = m
            .add_file(".manifest", "d".into(), 0, 0, false, false)
            .unwrap_err();
        assert!(matches!(err, ManifestError::ReservedName(_)));
    }

    #[test]
    fn hardlink_requires_existing_source() {
        let mut m = Manifest::new();
        let err = m.add_hardlink("b", "a").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));

        m.add_file("a", "dig".into(), 5, 5, false, false).unwrap();
        m.add_hardlink("b", "a").unwrap();
        let text = String::from_utf8(m.to_bytes()).unwrap();
        assert!(text.contains("F dig 5 5 a\n"));
        assert!(text.contains("F dig 5 5 b\n"));
    }

    #[test]
    fn remove_directory_is_recursive() {
        let mut m = Manifest::new();
        m.add_directory("a/b").unwrap();
        m.add_file("a/b/c", "d".into(), 0, 1, false, false).unwrap();
        m.remove("a").unwrap();
        assert_eq!(m.to_bytes(), Vec::<u8>::new());
    }

    #[test]
    fn time_offset_shifts_all_mtimes() {
        let mut m = Manifest::new();
        m.add_file("a", "d".into(), 100, 1, false, false).unwrap();
        m.time_offset(50);
        let text = String::from_utf8(m.to_bytes()).unwrap();
        assert!(text.contains(" 150 "));
    }

    #[test]
    fn uppercase_sorts_before_lowercase() {
        let mut m = Manifest::new();
        m.add_file("b", "d".into(), 0, 0, false, false).unwrap();
        m.add_file("A", "d".into(), 0, 0, false, false).unwrap();
        let text = String::from_utf8(m.to_bytes()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with(" A"));
        assert!(lines[1].ends_with(" b"));
    }
}
