//! Selections & Deployment (spec.md §4.8): presents solver output to
//! callers and performs atomic directory install/removal against a
//! known [`Manifest`].
//!
//! `DeployDirectory` and `ClearDirectory` share a stage/commit/rollback
//! shape: `stage()` prepares every change as a `.tmp` sibling without
//! touching the final names, `commit()` renames/deletes them, and
//! `rollback()` undoes a failed stage. Once `commit()` starts, a failure
//! partway through is fatal — the directory is left with some entries
//! already renamed and is not rolled back, matching spec.md §4.8 step 3's
//! "errors during commit are fatal and surfaced with the directory in a
//! partially-committed state."

use std::fs;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};

use zeroinstall_schema::manifest::{Manifest, ManifestEntry};
use zeroinstall_schema::{FeedUri, ImplementationSelection, Selections, SelectionsDiff};

use crate::errors::{EngineError, Result};
use crate::handler::Handler;
use crate::store::Store;

/// Selections whose digests the store doesn't have yet (spec.md §4.8
/// `get_uncached`). Local-path overrides and native package
/// implementations never live in the store, so they never count.
pub fn get_uncached(selections: &Selections, store: &Store) -> Result<Vec<ImplementationSelection>> {
    let mut out = Vec::new();
    for selection in &selections.implementations {
        if selection.local_path.is_some() || selection.id.starts_with("package:") {
            continue;
        }
        if !store.contains(&selection.manifest_digest)? {
            out.push(selection.clone());
        }
    }
    Ok(out)
}

/// Back-map each selection to the `Implementation` it was solved from,
/// via a caller-supplied resolver over the same feeds the Solver read
/// (spec.md §4.8 `get_implementations`, the engine's stand-in for the
/// original's `ISelectionCandidateProvider`).
pub fn get_implementations<'a>(
    selections: &'a Selections,
    resolve: impl Fn(&FeedUri, &str) -> Option<zeroinstall_schema::Implementation>,
) -> Vec<(&'a ImplementationSelection, Option<zeroinstall_schema::Implementation>)> {
    selections
        .implementations
        .iter()
        .map(|selection| {
            let implementation = resolve(&selection.from_feed, &selection.id);
            (selection, implementation)
        })
        .collect()
}

/// Topological DFS over `selections` from its root interface, yielding
/// `(depth, selection)` pairs for display (spec.md §4.8 `get_tree`). A
/// selection already on the current path is emitted once more at its
/// new depth but not re-expanded, so a diamond dependency doesn't loop.
pub fn get_tree(selections: &Selections) -> Vec<(usize, &ImplementationSelection)> {
    let mut out = Vec::new();
    if let Some(root) = &selections.interface_uri {
        let mut stack = Vec::new();
        visit_tree(selections, root, 0, &mut out, &mut stack);
    }
    out
}

fn visit_tree<'a>(
    selections: &'a Selections,
    interface: &FeedUri,
    depth: usize,
    out: &mut Vec<(usize, &'a ImplementationSelection)>,
    stack: &mut Vec<FeedUri>,
) {
    let Some(selection) = selections.get(interface) else {
        return;
    };
    out.push((depth, selection));
    if stack.contains(interface) {
        return;
    }
    stack.push(interface.clone());
    for dep in &selection.dependencies {
        visit_tree(selections, &dep.restriction.interface, depth + 1, out, stack);
    }
    if let Some(runner) = selection.command.as_ref().and_then(|c| c.runner.as_ref()) {
        visit_tree(selections, &runner.interface, depth + 1, out, stack);
    }
    stack.pop();
}

/// Per-interface differences between two solves (spec.md §4.8
/// `get_diff`); a thin named wrapper over [`Selections::diff`] so every
/// C8 operation lives under one module.
pub fn get_diff(old: &Selections, new: &Selections) -> Vec<SelectionsDiff> {
    Selections::diff(old, new)
}

/// Abstraction over the original's Windows Restart Manager integration
/// (spec.md §4.8): on Windows, closes handles processes hold open on
/// files about to be replaced, and reopens them once the deployment
/// finishes. This build's default, [`NullRestartManager`], is a no-op —
/// POSIX file replacement via `rename(2)` doesn't need it.
pub trait RestartManager {
    /// Close whatever has `paths` open, returning a token `reopen` later
    /// uses to restart them.
    fn close_handles(&self, paths: &[Utf8PathBuf]) -> Result<Vec<ClosedHandle>>;
    /// Restart whatever `close_handles` stopped, unless `NoRestart` was
    /// requested when it built this manager.
    fn reopen(&self, handles: Vec<ClosedHandle>);
}

/// Opaque token for a process `RestartManager::close_handles` stopped.
pub struct ClosedHandle;

/// The no-op [`RestartManager`] used outside Windows.
pub struct NullRestartManager;

impl RestartManager for NullRestartManager {
    fn close_handles(&self, _paths: &[Utf8PathBuf]) -> Result<Vec<ClosedHandle>> {
        Ok(Vec::new())
    }

    fn reopen(&self, _handles: Vec<ClosedHandle>) {}
}

/// Best-effort check that `dir`'s filesystem records sub-second mtimes,
/// since manifests compare at one-second resolution and a coarser clock
/// would make later verification spuriously fail. Two probe files are
/// written back to back; if both land on an exact second boundary the
/// filesystem is assumed too coarse. This can false-negative on a fast,
/// sub-second-capable filesystem that simply got unlucky twice in a row;
/// a fully reliable check would need filesystem-specific capability
/// probing this engine doesn't implement.
fn check_timestamp_resolution(dir: &Utf8Path) -> Result<()> {
    let mut saw_subsecond = false;
    for _ in 0..2 {
        let probe = dir.join(format!(".zi-probe-{}", uuid::Uuid::new_v4()));
        fs::write(&probe, b"x").map_err(|e| EngineError::io(&probe, e))?;
        let meta = fs::metadata(&probe).map_err(|e| EngineError::io(&probe, e))?;
        let _ = fs::remove_file(&probe);
        let mtime = meta.modified().map_err(|e| EngineError::io(&probe, e))?;
        if let Ok(since_epoch) = mtime.duration_since(UNIX_EPOCH) {
            if since_epoch.subsec_nanos() != 0 {
                saw_subsecond = true;
                break;
            }
        }
    }
    if saw_subsecond {
        Ok(())
    } else {
        Err(EngineError::NotSupported(
            "destination filesystem only records whole-second mtimes; manifest verification requires sub-second accuracy".into(),
        ))
    }
}

fn temp_sibling(path: &Utf8Path) -> Utf8PathBuf {
    let suffix = uuid::Uuid::new_v4();
    let file_name = path.file_name().unwrap_or("entry");
    path.with_file_name(format!("{file_name}.{suffix}.tmp"))
}

fn copy_manifest_entry(src: &Utf8Path, dst: &Utf8Path, entry: &ManifestEntry) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    match entry {
        ManifestEntry::Symlink { .. } => {
            let target = fs::read_link(src.as_std_path()).map_err(|e| EngineError::io(src, e))?;
            std::os::unix::fs::symlink(&target, dst.as_std_path()).map_err(|e| EngineError::io(dst, e))
        }
        ManifestEntry::NormalFile { .. } | ManifestEntry::ExecutableFile { .. } => {
            fs::copy(src.as_std_path(), dst.as_std_path()).map_err(|e| EngineError::io(src, e))?;
            if matches!(entry, ManifestEntry::ExecutableFile { .. }) {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = fs::metadata(dst.as_std_path()).map_err(|e| EngineError::io(dst, e))?.permissions();
                perms.set_mode(perms.mode() | 0o111);
                fs::set_permissions(dst.as_std_path(), perms).map_err(|e| EngineError::io(dst, e))?;
            }
            Ok(())
        }
        ManifestEntry::Directory => Ok(()),
    }
}

enum DeployEntry {
    Pending { tmp: Utf8PathBuf, final_path: Utf8PathBuf },
}

/// Copies `manifest`'s files from `src` into `dst`, atomically (spec.md
/// §4.8 `DeployDirectory`).
pub struct DeployDirectory<'a> {
    src: Utf8PathBuf,
    dst: Utf8PathBuf,
    manifest: &'a Manifest,
    handler: &'a dyn Handler,
    restart_manager: &'a dyn RestartManager,
    pending: Vec<DeployEntry>,
    closed_handles: Vec<ClosedHandle>,
}

impl<'a> DeployDirectory<'a> {
    /// Build a deployment from `src` to `dst`, not yet staged.
    pub fn new(
        src: impl Into<Utf8PathBuf>,
        manifest: &'a Manifest,
        dst: impl Into<Utf8PathBuf>,
        handler: &'a dyn Handler,
        restart_manager: &'a dyn RestartManager,
    ) -> Self {
        DeployDirectory {
            src: src.into(),
            dst: dst.into(),
            manifest,
            handler,
            restart_manager,
            pending: Vec::new(),
            closed_handles: Vec::new(),
        }
    }

    /// Phase 1: copy every manifest entry into a `.tmp` sibling of its
    /// final path, without touching anything already at the final name.
    pub fn stage(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dst).map_err(|e| EngineError::io(&self.dst, e))?;
        check_timestamp_resolution(&self.dst)?;

        let entries = self.manifest.file_entries();
        let total = entries.len() as u64;
        let paths: Vec<Utf8PathBuf> = entries.iter().map(|(path, _)| self.dst.join(path)).collect();
        self.closed_handles = self.restart_manager.close_handles(&paths)?;

        for (done, (path, entry)) in entries.into_iter().enumerate() {
            let src_path = self.src.join(&path);
            let final_path = self.dst.join(&path);
            let tmp = temp_sibling(&final_path);
            if let Err(err) = copy_manifest_entry(&src_path, &tmp, entry) {
                self.rollback();
                return Err(err);
            }
            self.pending.push(DeployEntry::Pending { tmp, final_path });
            self.handler.progress("deploying", done as u64 + 1, total);
        }
        Ok(())
    }

    /// Phase 2: rename every staged file into its final name. Fatal on
    /// partial failure; already-renamed entries are left in place.
    pub fn commit(mut self) -> Result<()> {
        for entry in self.pending.drain(..) {
            let DeployEntry::Pending { tmp, final_path } = entry;
            fs::rename(tmp.as_std_path(), final_path.as_std_path()).map_err(|e| EngineError::io(&final_path, e))?;
        }
        self.restart_manager.reopen(std::mem::take(&mut self.closed_handles));
        Ok(())
    }

    /// Undo a partially completed `stage()`, deleting every `.tmp` file
    /// written so far.
    pub fn rollback(&mut self) {
        for entry in self.pending.drain(..) {
            let DeployEntry::Pending { tmp, .. } = entry;
            let _ = fs::remove_file(tmp.as_std_path());
        }
        self.restart_manager.reopen(std::mem::take(&mut self.closed_handles));
    }
}

enum ClearEntry {
    Aside { tmp: Utf8PathBuf, original: Utf8PathBuf },
}

/// Removes `manifest`'s files from `path`, atomically (spec.md §4.8
/// `ClearDirectory`). Entries the manifest lists but `path` no longer
/// has are silently skipped; files `path` has that the manifest doesn't
/// list are left untouched.
pub struct ClearDirectory<'a> {
    path: Utf8PathBuf,
    manifest: &'a Manifest,
    handler: &'a dyn Handler,
    restart_manager: &'a dyn RestartManager,
    pending: Vec<ClearEntry>,
    closed_handles: Vec<ClosedHandle>,
}

impl<'a> ClearDirectory<'a> {
    /// Build a clear operation over `path`, not yet staged.
    pub fn new(path: impl Into<Utf8PathBuf>, manifest: &'a Manifest, handler: &'a dyn Handler, restart_manager: &'a dyn RestartManager) -> Self {
        ClearDirectory {
            path: path.into(),
            manifest,
            handler,
            restart_manager,
            pending: Vec::new(),
            closed_handles: Vec::new(),
        }
    }

    /// Phase 1: move every manifest entry still present aside to a
    /// `.tmp` sibling.
    pub fn stage(&mut self) -> Result<()> {
        let entries = self.manifest.file_entries();
        let total = entries.len() as u64;
        let paths: Vec<Utf8PathBuf> = entries.iter().map(|(path, _)| self.path.join(path)).collect();
        self.closed_handles = self.restart_manager.close_handles(&paths)?;

        for (done, (path, _entry)) in entries.into_iter().enumerate() {
            let original = self.path.join(&path);
            if !original.exists() && !original.is_symlink() {
                self.handler.progress("clearing", done as u64 + 1, total);
                continue;
            }
            let tmp = temp_sibling(&original);
            if let Err(err) = fs::rename(original.as_std_path(), tmp.as_std_path()).map_err(|e| EngineError::io(&original, e)) {
                self.rollback();
                return Err(err);
            }
            self.pending.push(ClearEntry::Aside { tmp, original });
            self.handler.progress("clearing", done as u64 + 1, total);
        }
        Ok(())
    }

    /// Phase 2: delete every aside file. Fatal on partial failure.
    pub fn commit(mut self) -> Result<()> {
        for entry in self.pending.drain(..) {
            let ClearEntry::Aside { tmp, .. } = entry;
            if tmp.is_dir() {
                fs::remove_dir_all(tmp.as_std_path()).map_err(|e| EngineError::io(&tmp, e))?;
            } else {
                fs::remove_file(tmp.as_std_path()).map_err(|e| EngineError::io(&tmp, e))?;
            }
        }
        self.restart_manager.reopen(std::mem::take(&mut self.closed_handles));
        Ok(())
    }

    /// Undo a partially completed `stage()`, moving every aside file
    /// back to its original name.
    pub fn rollback(&mut self) {
        for entry in self.pending.drain(..) {
            let ClearEntry::Aside { tmp, original } = entry;
            let _ = fs::rename(tmp.as_std_path(), original.as_std_path());
        }
        self.restart_manager.reopen(std::mem::take(&mut self.closed_handles));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SilentHandler;

    fn write(path: &Utf8Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
    }

    #[test]
    fn deploy_copies_manifest_listed_files_only() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let src_root = Utf8PathBuf::from_path_buf(src.path().to_path_buf()).unwrap();
        let dst_root = Utf8PathBuf::from_path_buf(dst.path().to_path_buf()).unwrap();

        write(&src_root.join("bin/run"), b"#!/bin/sh\necho hi\n");

        let mut manifest = Manifest::new();
        manifest.add_directory("bin").unwrap();
        manifest
            .add_file("bin/run", "deadbeef".into(), 0, 19, false, false)
            .unwrap();

        let handler = SilentHandler;
        let restart = NullRestartManager;
        let mut deploy = DeployDirectory::new(src_root, &manifest, dst_root.clone(), &handler, &restart);
        deploy.stage().unwrap();
        deploy.commit().unwrap();

        assert!(dst_root.join("bin/run").exists());
    }

    #[test]
    fn clear_skips_already_missing_entries() {
        let dst = tempfile::tempdir().unwrap();
        let dst_root = Utf8PathBuf::from_path_buf(dst.path().to_path_buf()).unwrap();

        let mut manifest = Manifest::new();
        manifest.add_directory("bin").unwrap();
        manifest
            .add_file("bin/run", "deadbeef".into(), 0, 19, false, false)
            .unwrap();

        let handler = SilentHandler;
        let restart = NullRestartManager;
        let mut clear = ClearDirectory::new(dst_root, &manifest, &handler, &restart);
        clear.stage().unwrap();
        clear.commit().unwrap();
    }

    #[test]
    fn get_uncached_skips_local_and_package_selections() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::new(vec![Utf8PathBuf::from_path_buf(store_dir.path().to_path_buf()).unwrap()]);

        let mut selections = Selections::default();
        selections.implementations.push(ImplementationSelection {
            interface_uri: FeedUri::new("https://example.com/a.xml".to_owned()),
            from_feed: FeedUri::new("https://example.com/a.xml".to_owned()),
            id: "package:deb:curl:7.0".to_owned(),
            version: zeroinstall_schema::ImplementationVersion::parse("7.0").unwrap(),
            architecture: None,
            stability: zeroinstall_schema::Stability::Packaged,
            manifest_digest: zeroinstall_schema::ManifestDigest::new(),
            command: None,
            dependencies: vec![],
            restrictions: vec![],
            bindings: vec![],
            local_path: None,
        });

        let uncached = get_uncached(&selections, &store).unwrap();
        assert!(uncached.is_empty());
    }
}
