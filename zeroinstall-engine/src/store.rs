//! Content-addressed Implementation Store (spec.md §4.2): keeps the
//! invariant that `<root>/<algorithm><sep><digest>` contains exactly the
//! files whose Manifest digest is `<digest>`, and makes ingestion atomic.

use std::fs;
use std::os::unix::fs::symlink;

use camino::{Utf8Path, Utf8PathBuf};
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use zeroinstall_schema::feed::Archive;
use zeroinstall_schema::ManifestDigest;

use crate::archive::extract_archive;
use crate::errors::{EngineError, Result};
use crate::handler::{CancellationToken, Handler};
use crate::manifest_builder::manifest_of_directory;

/// A search path of store roots (spec.md §4.2 "Locations"): reads consult
/// every root, writes always target the first.
#[derive(Clone, Debug)]
pub struct Store {
    roots: Vec<Utf8PathBuf>,
}

impl Store {
    /// Build a store over `roots`, the first of which receives writes.
    /// Panics only if `roots` is empty — every caller has at least the
    /// user store to fall back to.
    pub fn new(roots: Vec<Utf8PathBuf>) -> Self {
        assert!(!roots.is_empty(), "a store needs at least one root");
        Store { roots }
    }

    fn primary(&self) -> &Utf8Path {
        &self.roots[0]
    }

    /// Directory name a digest is stored under (`<algorithm><sep><digest>`).
    fn dir_name(digest: &ManifestDigest) -> Result<String> {
        digest
            .best_store_name()
            .ok_or_else(|| EngineError::NotSupported("manifest digest has no recognized algorithm".into()))
    }

    /// Cheap existence check across every root (spec.md §4.2 `contains`).
    pub fn contains(&self, digest: &ManifestDigest) -> Result<bool> {
        Ok(self.get_path(digest)?.is_some())
    }

    /// First matching directory across the search path.
    pub fn get_path(&self, digest: &ManifestDigest) -> Result<Option<Utf8PathBuf>> {
        let name = Self::dir_name(digest)?;
        for root in &self.roots {
            let candidate = root.join(&name);
            if candidate.is_dir() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Copy `src` into a staging directory under the primary root,
    /// recompute its Manifest under `digest`'s best format, and rename it
    /// into place atomically (spec.md §4.2 `add_directory`).
    ///
    /// If another process finishes ingesting the same digest first, this
    /// call silently discards its own staging directory and returns the
    /// winner's path.
    pub fn add_directory(
        &self,
        src: &Utf8Path,
        digest: &ManifestDigest,
        token: &CancellationToken,
        handler: &dyn Handler,
    ) -> Result<Utf8PathBuf> {
        let (format, expected) = digest
            .best()
            .ok_or_else(|| EngineError::NotSupported("empty manifest digest".into()))?;
        let name = Self::dir_name(digest)?;
        let final_dir = self.primary().join(&name);
        if final_dir.is_dir() {
            return Ok(final_dir);
        }

        let staging = self.new_staging_dir();
        fs::create_dir_all(&staging).map_err(|e| EngineError::io(&staging, e))?;

        let outcome = (|| -> Result<()> {
            token.check()?;
            copy_tree(src, &staging)?;
            Ok(())
        })();
        if let Err(err) = outcome {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        self.commit_staging(staging, &final_dir, &name, format, expected, token, handler)
    }

    /// Extract `archives` (in the order they appear in their recipe) on
    /// top of one another into a fresh staging directory and ingest the
    /// result, without an intermediate plain-directory copy (spec.md
    /// §4.6's fast path: "if every step is an archive, call
    /// `store.add_archives` directly"). Each archive's bytes must already
    /// be downloaded.
    pub fn add_archives(
        &self,
        archives: &[(Archive, Vec<u8>)],
        digest: &ManifestDigest,
        token: &CancellationToken,
        handler: &dyn Handler,
    ) -> Result<Utf8PathBuf> {
        let (format, expected) = digest
            .best()
            .ok_or_else(|| EngineError::NotSupported("empty manifest digest".into()))?;
        let name = Self::dir_name(digest)?;
        let final_dir = self.primary().join(&name);
        if final_dir.is_dir() {
            return Ok(final_dir);
        }

        let staging = self.new_staging_dir();
        fs::create_dir_all(&staging).map_err(|e| EngineError::io(&staging, e))?;

        let outcome = (|| -> Result<()> {
            for (archive, bytes) in archives {
                token.check()?;
                extract_archive(archive, bytes, &staging, token)?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        self.commit_staging(staging, &final_dir, &name, format, expected, token, handler)
    }

    fn new_staging_dir(&self) -> Utf8PathBuf {
        let token_suffix = uuid::Uuid::new_v4();
        self.primary().join(format!(".staging.{token_suffix}"))
    }

    /// Verify a populated staging directory against `expected` and
    /// atomically rename it into place, discarding it if another process
    /// wins the race to ingest the same digest first.
    fn commit_staging(
        &self,
        staging: Utf8PathBuf,
        final_dir: &Utf8Path,
        name: &str,
        format: zeroinstall_schema::ManifestFormat,
        expected: &str,
        token: &CancellationToken,
        handler: &dyn Handler,
    ) -> Result<Utf8PathBuf> {
        let outcome = (|| -> Result<()> {
            token.check()?;
            let (_manifest, computed) = manifest_of_directory(&staging, format)?;
            if computed != expected {
                return Err(EngineError::DigestMismatch {
                    expected: expected.to_owned(),
                    computed,
                });
            }
            handler.progress(&format!("verified {name}"), 1, 1);
            Ok(())
        })();

        if let Err(err) = outcome {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        token.check().inspect_err(|_| {
            let _ = fs::remove_dir_all(&staging);
        })?;

        match fs::rename(&staging, final_dir) {
            Ok(()) => {
                info!(digest = %name, "implementation ingested into store");
                Ok(final_dir.to_owned())
            }
            Err(_) if final_dir.is_dir() => {
                debug!(digest = %name, "lost the race to ingest, discarding staging dir");
                let _ = fs::remove_dir_all(&staging);
                Ok(final_dir.to_owned())
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(EngineError::io(final_dir, e))
            }
        }
    }

    /// Unlink a store directory outright.
    pub fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let Some(path) = self.get_path(digest)? else {
            return Ok(());
        };
        fs::remove_dir_all(&path).map_err(|e| EngineError::io(&path, e))
    }

    /// Every digest-named directory across every root, deduplicated.
    pub fn list_all(&self) -> Result<Vec<String>> {
        let mut out = std::collections::BTreeSet::new();
        for root in &self.roots {
            if !root.is_dir() {
                continue;
            }
            let entries = fs::read_dir(root.as_std_path()).map_err(|e| EngineError::io(root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| EngineError::io(root, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if ManifestDigest::parse_store_name(&name).is_some() {
                    out.insert(name);
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Recompute the Manifest of the directory holding `digest` and
    /// confirm it still matches (spec.md §4.2 `verify`).
    pub fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        let (format, expected) = digest
            .best()
            .ok_or_else(|| EngineError::NotSupported("empty manifest digest".into()))?;
        let path = self
            .get_path(digest)?
            .ok_or_else(|| EngineError::NotFound(format!("{} not in store", Self::dir_name(digest)?)))?;
        handler.progress(&format!("verifying {path}"), 0, 1);
        let (_manifest, computed) = manifest_of_directory(&path, format)?;
        if computed != expected {
            return Err(EngineError::DigestMismatch {
                expected: expected.to_owned(),
                computed,
            });
        }
        Ok(())
    }

    /// Scan the primary root for files with identical content across
    /// different implementations and replace duplicates with hardlinks,
    /// returning bytes saved (spec.md §4.2 `optimise`).
    pub fn optimise(&self) -> Result<u64> {
        self.optimise_impl(false)
    }

    /// Like [`Store::optimise`] but reports the hardlink opportunities
    /// without mutating anything (supplemented feature: a future
    /// `store optimise --dry-run` CLI can build on this without engine
    /// changes).
    pub fn optimise_dry_run(&self) -> Result<u64> {
        self.optimise_impl(true)
    }

    fn optimise_impl(&self, dry_run: bool) -> Result<u64> {
        let mut by_content: std::collections::HashMap<(u64, String), Utf8PathBuf> = std::collections::HashMap::new();
        let mut saved = 0u64;

        for root in &self.roots {
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(root.as_std_path()).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
                    continue;
                };
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let size = metadata.len();
                let Ok(bytes) = fs::read(&path) else {
                    continue;
                };
                let digest = HEXLOWER.encode(&Sha256::digest(&bytes));
                let key = (size, digest);
                match by_content.get(&key) {
                    Some(existing) if existing != &path => {
                        if same_file_content(existing, &path) {
                            if !dry_run {
                                let tmp = path.with_extension("hardlink.tmp");
                                if fs::hard_link(existing, &tmp).is_ok() {
                                    let _ = fs::rename(&tmp, &path);
                                }
                            }
                            saved += size;
                        }
                    }
                    _ => {
                        by_content.insert(key, path);
                    }
                }
            }
        }
        Ok(saved)
    }
}

fn same_file_content(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Recursively copy `src` into `dst`, preserving symlinks and permission
/// bits (`std::fs::copy` carries the executable bit on Unix).
pub(crate) fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(src.as_std_path()).into_iter() {
        let entry = entry.map_err(|e| EngineError::io(src, e.into()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
            .map_err(|p| EngineError::NotSupported(format!("non-UTF8 path: {}", p.display())))?;
        let rel = path.strip_prefix(src).unwrap_or(Utf8Path::new(""));
        let target = dst.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| EngineError::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(&path).map_err(|e| EngineError::io(&path, e))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            symlink(&link_target, &target).map_err(|e| EngineError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            fs::copy(&path, &target).map_err(|e| EngineError::io(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SilentHandler;
    use zeroinstall_schema::ManifestFormat;

    fn sample_source(dir: &Utf8Path) {
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin/run.sh"), b"#!/bin/sh\necho hi\n").unwrap();
    }

    #[test]
    fn add_directory_ingests_and_get_path_finds_it() {
        let store_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = Utf8Path::from_path(src_dir.path()).unwrap();
        sample_source(src);

        let (_manifest, computed) = manifest_of_directory(src, ManifestFormat::Sha256New).unwrap();
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha256New, computed);

        let store = Store::new(vec![Utf8PathBuf::from_path_buf(store_dir.path().to_path_buf()).unwrap()]);
        let token = CancellationToken::new();
        let handler = SilentHandler::default();
        let path = store.add_directory(src, &digest, &token, &handler).unwrap();
        assert!(path.join("bin/run.sh").is_file());
        assert!(store.contains(&digest).unwrap());
    }

    #[test]
    fn add_directory_rejects_digest_mismatch() {
        let store_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = Utf8Path::from_path(src_dir.path()).unwrap();
        sample_source(src);

        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha256New, "not-the-real-digest".into());

        let store = Store::new(vec![Utf8PathBuf::from_path_buf(store_dir.path().to_path_buf()).unwrap()]);
        let token = CancellationToken::new();
        let handler = SilentHandler::default();
        let err = store.add_directory(src, &digest, &token, &handler).unwrap_err();
        assert!(matches!(err, EngineError::DigestMismatch { .. }));
    }

    #[test]
    fn get_path_checks_every_root_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let second_path = Utf8PathBuf::from_path_buf(second.path().to_path_buf()).unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src = Utf8Path::from_path(src_dir.path()).unwrap();
        sample_source(src);
        let (_manifest, computed) = manifest_of_directory(src, ManifestFormat::Sha256New).unwrap();
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha256New, computed);

        let only_second = Store::new(vec![second_path.clone()]);
        let token = CancellationToken::new();
        let handler = SilentHandler::default();
        only_second.add_directory(src, &digest, &token, &handler).unwrap();

        let combined = Store::new(vec![
            Utf8PathBuf::from_path_buf(first.path().to_path_buf()).unwrap(),
            second_path,
        ]);
        assert!(combined.get_path(&digest).unwrap().is_some());
    }
}
