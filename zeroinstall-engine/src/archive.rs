//! Archive Extractor (spec.md §4.5): unpacks a downloaded archive's bytes
//! into a real directory tree, honoring `sub_dir` stripping and a leading
//! `start_offset`. The Fetcher (C6) calls this once per recipe step or
//! whole-archive retrieval; the Manifest Engine (C1) reads the result back
//! off disk afterward, so there is no push-style `ManifestBuilder` API
//! here to keep in lockstep — unpacking and hashing stay two separate
//! passes over the filesystem, the same split `manifest_builder.rs`
//! already makes between walking a tree and digesting it.
//!
//! [`build_zip`] is the export direction: it packs an implementation
//! directory already in the store back into zip bytes, for the
//! peer-discovery responder to hand to another peer on the local network.
//! It only ever produces zip, regardless of how the implementation was
//! originally fetched, since that's the one format every peer is
//! guaranteed to be able to unpack again with this same module.
//!
//! Supported extraction formats are the subset the available codec crates
//! cover: zip, tar (plain/gzip/bzip2/xz), and ar. Proprietary installer
//! formats (7z, rar, cab, dmg, msi) and distro package formats beyond ar's
//! outer container (deb's nested data.tar.*, rpm's cpio payload) are not
//! implemented; `extract_archive` returns [`EngineError::NotSupported`]
//! for them.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use zeroinstall_schema::feed::Archive;

use crate::errors::{EngineError, Result};
use crate::handler::CancellationToken;

enum ArchiveFormat {
    Zip,
    TarPlain,
    TarGz,
    TarBz2,
    TarXz,
    Ar,
}

fn format_from_mime(mime: &str) -> Option<ArchiveFormat> {
    match mime {
        "application/zip" => Some(ArchiveFormat::Zip),
        "application/x-tar" => Some(ArchiveFormat::TarPlain),
        "application/x-compressed-tar" => Some(ArchiveFormat::TarGz),
        "application/x-bzip-compressed-tar" => Some(ArchiveFormat::TarBz2),
        "application/x-lzma-compressed-tar" | "application/x-xz-compressed-tar" => Some(ArchiveFormat::TarXz),
        "application/x-ar" | "application/x-deb" => Some(ArchiveFormat::Ar),
        _ => None,
    }
}

fn format_from_extension(href: &str) -> Option<ArchiveFormat> {
    let lower = href.to_ascii_lowercase();
    let name = lower.split(['?', '#']).next().unwrap_or(&lower);
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Some(ArchiveFormat::TarBz2)
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Some(ArchiveFormat::TarXz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::TarPlain)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else if name.ends_with(".deb") || name.ends_with(".ar") {
        Some(ArchiveFormat::Ar)
    } else {
        None
    }
}

fn recognize_format(href: &str, declared_mime: Option<&str>) -> Option<ArchiveFormat> {
    declared_mime
        .and_then(format_from_mime)
        .or_else(|| format_from_extension(href))
}

/// Strip `sub_dir` off `path`. Per spec.md §4.5, a prefix that matches a
/// file rather than a directory yields empty output for that entry
/// rather than the file itself — handled naturally here since stripping
/// an exact-match prefix leaves an empty relative path, which callers
/// skip.
fn strip_sub_dir(path: &Path, sub_dir: Option<&str>) -> Option<PathBuf> {
    match sub_dir {
        None => Some(path.to_path_buf()),
        Some(prefix) => path.strip_prefix(Path::new(prefix)).ok().map(Path::to_path_buf),
    }
}

fn utf8_rel(path: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| EngineError::NotSupported(format!("non-UTF8 path in archive: {}", p.display())))
}

/// Unpack `data` (already downloaded in full) into `dest_root`, per
/// `archive`'s declared format, extraction prefix, destination
/// subdirectory and start offset.
pub fn extract_archive(archive: &Archive, data: &[u8], dest_root: &Utf8Path, token: &CancellationToken) -> Result<()> {
    let format = recognize_format(&archive.href, archive.mime_type.as_deref())
        .ok_or_else(|| EngineError::NotSupported(format!("unrecognized archive format for {}", archive.href)))?;

    let start = archive.start_offset as usize;
    let payload = data
        .get(start..)
        .ok_or_else(|| EngineError::NotSupported("start_offset is beyond the end of the archive".into()))?;

    let dest = match &archive.destination {
        Some(sub) => dest_root.join(sub),
        None => dest_root.to_owned(),
    };
    fs::create_dir_all(&dest).map_err(|e| EngineError::io(&dest, e))?;
    let sub_dir = archive.extract.as_deref();

    match format {
        ArchiveFormat::Zip => extract_zip(payload, sub_dir, &dest, token),
        ArchiveFormat::TarPlain => extract_tar(payload, sub_dir, &dest, token),
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(payload), sub_dir, &dest, token),
        ArchiveFormat::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(payload), sub_dir, &dest, token),
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(payload), sub_dir, &dest, token),
        ArchiveFormat::Ar => extract_ar(payload, sub_dir, &dest, token),
    }
}

fn extract_tar<R: Read>(reader: R, sub_dir: Option<&str>, dest: &Utf8Path, token: &CancellationToken) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let entries = archive
        .entries()
        .map_err(|e| EngineError::NotSupported(format!("corrupt tar archive: {e}")))?;
    for entry in entries {
        token.check()?;
        let mut entry = entry.map_err(|e| EngineError::NotSupported(format!("corrupt tar entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| EngineError::NotSupported(format!("corrupt tar entry path: {e}")))?
            .into_owned();
        let Some(rel) = strip_sub_dir(&path, sub_dir) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(utf8_rel(rel)?);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        entry.unpack(out_path.as_std_path()).map_err(|e| EngineError::io(&out_path, e))?;
    }
    Ok(())
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn extract_zip(payload: &[u8], sub_dir: Option<&str>, dest: &Utf8Path, token: &CancellationToken) -> Result<()> {
    let cursor = std::io::Cursor::new(payload);
    let mut zip = zip::ZipArchive::new(cursor).map_err(|e| EngineError::NotSupported(format!("corrupt zip archive: {e}")))?;
    for i in 0..zip.len() {
        token.check()?;
        let mut file = zip
            .by_index(i)
            .map_err(|e| EngineError::NotSupported(format!("corrupt zip entry: {e}")))?;
        let Some(path) = file.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let Some(rel) = strip_sub_dir(&path, sub_dir) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(utf8_rel(rel)?);

        if file.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| EngineError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }

        if let Some(mode) = file.unix_mode() {
            if mode & S_IFMT == S_IFLNK {
                let mut target = String::new();
                file.read_to_string(&mut target).map_err(|e| EngineError::io(&out_path, e))?;
                let _ = fs::remove_file(&out_path);
                symlink(&target, out_path.as_std_path()).map_err(|e| EngineError::io(&out_path, e))?;
                continue;
            }
        }

        let mut out = fs::File::create(&out_path).map_err(|e| EngineError::io(&out_path, e))?;
        std::io::copy(&mut file, &mut out).map_err(|e| EngineError::io(&out_path, e))?;
        if let Some(mode) = file.unix_mode() {
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| EngineError::io(&out_path, e))?;
        }
    }
    Ok(())
}

fn extract_ar(payload: &[u8], sub_dir: Option<&str>, dest: &Utf8Path, token: &CancellationToken) -> Result<()> {
    let mut archive = ar::Archive::new(payload);
    while let Some(entry) = archive.next_entry() {
        token.check()?;
        let mut entry = entry.map_err(|e| EngineError::NotSupported(format!("corrupt ar entry: {e}")))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        let Some(rel) = strip_sub_dir(Path::new(&name), sub_dir) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(utf8_rel(rel)?);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| EngineError::io(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| EngineError::io(&out_path, e))?;
    }
    Ok(())
}

/// Pack the directory tree at `root` into zip bytes, preserving symlinks
/// (stored as a regular entry holding the link target text, the same
/// encoding `extract_zip` already knows how to unwind) and Unix
/// executable bits. Used by the peer-discovery responder to serve a
/// store entry to a peer that asked for it by digest.
pub fn build_zip(root: &Utf8Path, token: &CancellationToken) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut bytes));
        for entry in WalkDir::new(root.as_std_path()).min_depth(1).into_iter() {
            token.check()?;
            let entry = entry.map_err(|e| EngineError::io(root, e.into()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
                .map_err(|p| EngineError::NotSupported(format!("non-UTF8 path: {}", p.display())))?;
            let rel = path
                .strip_prefix(root)
                .map_err(|_| EngineError::NotSupported(format!("{path} escapes {root}")))?
                .to_string();
            let metadata = entry.metadata().map_err(|e| EngineError::io(&path, e.into()))?;

            if metadata.file_type().is_symlink() {
                let target = fs::read_link(&path).map_err(|e| EngineError::io(&path, e))?;
                let target = target
                    .to_str()
                    .ok_or_else(|| EngineError::NotSupported(format!("non-UTF8 symlink target at {path}")))?;
                let options = zip::write::FileOptions::default().unix_permissions(S_IFLNK | 0o777);
                writer.start_file(&rel, options).map_err(|e| EngineError::io(&path, zip_io_err(e)))?;
                writer.write_all(target.as_bytes()).map_err(|e| EngineError::io(&path, e))?;
            } else if metadata.is_dir() {
                let options = zip::write::FileOptions::default().unix_permissions(0o755);
                writer
                    .add_directory(&rel, options)
                    .map_err(|e| EngineError::io(&path, zip_io_err(e)))?;
            } else {
                let mode = if metadata.mode() & 0o111 != 0 { 0o755 } else { 0o644 };
                let options = zip::write::FileOptions::default().unix_permissions(mode);
                writer.start_file(&rel, options).map_err(|e| EngineError::io(&path, zip_io_err(e)))?;
                let mut file = fs::File::open(&path).map_err(|e| EngineError::io(&path, e))?;
                std::io::copy(&mut file, &mut writer).map_err(|e| EngineError::io(&path, e))?;
            }
        }
        writer.finish().map_err(|e| EngineError::io(root, zip_io_err(e)))?;
    }
    Ok(bytes)
}

fn zip_io_err(e: zip::result::ZipError) -> std::io::Error {
    match e {
        zip::result::ZipError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive(href: &str) -> Archive {
        Archive {
            href: href.to_owned(),
            mime_type: None,
            size: 0,
            extract: None,
            destination: None,
            start_offset: 0,
        }
    }

    #[test]
    fn extracts_plain_zip() {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
            let options = zip::write::FileOptions::default();
            writer.start_file("hello.txt", options).unwrap();
            writer.write_all(b"hello from zip").unwrap();
            writer.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8Path::from_path(dir.path()).unwrap();
        let archive = sample_archive("app-1.0.zip");
        let token = CancellationToken::new();
        extract_archive(&archive, &zip_bytes, dest, &token).unwrap();

        let content = fs::read_to_string(dest.join("hello.txt")).unwrap();
        assert_eq!(content, "hello from zip");
    }

    #[test]
    fn extracts_tar_gz_with_sub_dir_stripped() {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            let data = b"payload";
            let mut header = tar::Header::new_gnu();
            header.set_path("app-1.0/bin/run").unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.finish().unwrap();
        }
        let mut gz_bytes = Vec::new();
        {
            let mut encoder = flate2::write::GzEncoder::new(&mut gz_bytes, flate2::Compression::default());
            encoder.write_all(&tar_bytes).unwrap();
            encoder.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8Path::from_path(dir.path()).unwrap();
        let mut archive = sample_archive("app-1.0.tar.gz");
        archive.extract = Some("app-1.0".to_owned());
        let token = CancellationToken::new();
        extract_archive(&archive, &gz_bytes, dest, &token).unwrap();

        assert!(dest.join("bin/run").exists());
    }

    #[test]
    fn unrecognized_extension_is_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8Path::from_path(dir.path()).unwrap();
        let archive = sample_archive("app-1.0.rpm");
        let token = CancellationToken::new();
        let err = extract_archive(&archive, b"not really an rpm", dest, &token).unwrap_err();
        assert!(matches!(err, EngineError::NotSupported(_)));
    }

    #[test]
    fn cancellation_is_observed_before_extraction_completes() {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
            let options = zip::write::FileOptions::default();
            writer.start_file("a.txt", options).unwrap();
            writer.write_all(b"a").unwrap();
            writer.start_file("b.txt", options).unwrap();
            writer.write_all(b"b").unwrap();
            writer.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8Path::from_path(dir.path()).unwrap();
        let archive = sample_archive("app.zip");
        let token = CancellationToken::new();
        token.cancel();
        let err = extract_archive(&archive, &zip_bytes, dest, &token).unwrap_err();
        assert!(matches!(err, EngineError::Canceled));
    }

    #[test]
    fn build_zip_round_trips_through_extract_zip() {
        let src = tempfile::tempdir().unwrap();
        let src_root = Utf8Path::from_path(src.path()).unwrap();
        fs::create_dir_all(src_root.join("bin")).unwrap();
        fs::write(src_root.join("bin/run"), b"#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(src_root.join("bin/run"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src_root.join("README"), b"hello").unwrap();
        symlink("README", src_root.join("alias")).unwrap();

        let token = CancellationToken::new();
        let zip_bytes = build_zip(src_root, &token).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let dest_root = Utf8Path::from_path(dest.path()).unwrap();
        let archive = sample_archive("rebuilt.zip");
        extract_archive(&archive, &zip_bytes, dest_root, &token).unwrap();

        assert_eq!(fs::read_to_string(dest_root.join("README")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(dest_root.join("bin/run")).unwrap(), "#!/bin/sh\necho hi\n");
        let mode = fs::metadata(dest_root.join("bin/run")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
        let link_target = fs::read_link(dest_root.join("alias")).unwrap();
        assert_eq!(link_target, Path::new("README"));
    }
}
