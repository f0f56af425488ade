//! The I/O half of the Manifest Engine (spec.md §4.1): walks a real
//! directory tree, hashes file and symlink content, and builds the pure
//! in-memory [`zeroinstall_schema::manifest::Manifest`] the schema crate
//! defines. Digest computation itself lives here because it needs
//! `sha1`/`sha2`, which the data-model crate has no reason to depend on.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};

use camino::{Utf8Path, Utf8PathBuf};
use data_encoding::{BASE32_NOPAD, HEXLOWER, HEXUPPER};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use zeroinstall_schema::manifest::Manifest;
use zeroinstall_schema::ManifestFormat;

use crate::errors::{EngineError, Result};

/// Hash `bytes` and text-encode the digest the way `format` requires
/// (spec.md §4.1 "Digest").
fn hash_bytes(format: ManifestFormat, bytes: &[u8]) -> String {
    match format {
        ManifestFormat::Sha1New => HEXLOWER.encode(&Sha1::digest(bytes)),
        ManifestFormat::Sha256New => BASE32_NOPAD.encode(&Sha256::digest(bytes)).to_ascii_lowercase(),
        ManifestFormat::Sha256 => HEXUPPER.encode(&Sha256::digest(bytes)),
    }
}

/// Walk the real directory at `root` and build its manifest under
/// `format`, recording file/symlink digests as it goes.
fn build_manifest(root: &Utf8Path, format: ManifestFormat) -> Result<Manifest> {
    let mut manifest = Manifest::new();

    for entry in WalkDir::new(root.as_std_path()).min_depth(1).into_iter() {
        let entry = entry.map_err(|e| EngineError::io(root, e.into()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
            .map_err(|p| EngineError::NotSupported(format!("non-UTF8 path: {}", p.display())))?;
        let rel = path
            .strip_prefix(root)
            .map_err(|_| EngineError::NotSupported(format!("{path} escapes {root}")))?
            .as_str()
            .replace(std::path::MAIN_SEPARATOR, "/");

        let metadata = entry.metadata().map_err(|e| EngineError::io(&path, e.into()))?;

        if metadata.is_dir() {
            manifest.add_directory(&rel)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path).map_err(|e| EngineError::io(&path, e))?;
            let target = target.to_string_lossy().into_owned();
            let digest = hash_bytes(format, target.as_bytes());
            manifest.add_symlink(&rel, digest, target.len() as u64, true)?;
        } else {
            let bytes = fs::read(&path).map_err(|e| EngineError::io(&path, e))?;
            let digest = hash_bytes(format, &bytes);
            let executable = metadata.permissions().mode() & 0o111 != 0;
            let mtime = metadata.mtime();
            manifest.add_file(&rel, digest, mtime, bytes.len() as u64, executable, true)?;
        }
    }

    Ok(manifest)
}

/// Compute `format`'s manifest of the real directory at `root`, and the
/// store digest that names it (spec.md §4.1 "Digest": hash the
/// canonical line sequence, then text-encode per `format`). This is what
/// the Store (C2) calls after copying a source tree into staging, and
/// what the Fetcher (C6) calls to verify a materialized implementation
/// against its declared digest.
pub fn manifest_of_directory(root: &Utf8Path, format: ManifestFormat) -> Result<(Manifest, String)> {
    let manifest = build_manifest(root, format)?;
    let bytes = manifest.to_bytes();
    let store_digest = hash_bytes(format, &bytes);
    Ok((manifest, store_digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn digest_is_stable_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let mut f = File::create(root.join("hello.txt")).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);
        std::fs::create_dir(root.join("sub")).unwrap();

        let (_, digest_a) = manifest_of_directory(root, ManifestFormat::Sha256New).unwrap();
        let (_, digest_b) = manifest_of_directory(root, ManifestFormat::Sha256New).unwrap();
        assert_eq!(digest_a, digest_b);
    }

    #[test]
    fn executable_bit_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let exe_path = root.join("run.sh");
        std::fs::write(&exe_path, b"#!/bin/sh\n").unwrap();
        let mut perms = std::fs::metadata(&exe_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&exe_path, perms).unwrap();

        let (manifest, _) = manifest_of_directory(root, ManifestFormat::Sha1New).unwrap();
        let text = String::from_utf8(manifest.to_bytes()).unwrap();
        assert!(text.lines().any(|l| l.starts_with("X ") && l.ends_with("run.sh")));
    }
}
