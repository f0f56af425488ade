//! Fetcher & Recipe Engine (spec.md §4.6): turns one selected
//! [`Implementation`] into a materialized directory in the [`Store`],
//! trying a peer-served copy first, then each retrieval method in ranked
//! order, following mirror fallback on retryable network errors.
//!
//! A single process-wide table of in-flight `(digest, href)` pairs
//! serializes concurrent requests for the exact same download: a second
//! caller blocks on a condition variable rather than re-fetching, and
//! rechecks the store once woken in case the first caller already
//! finished it.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};

use camino::Utf8PathBuf;

use zeroinstall_native::{NativePackageRegistry, PeerDiscovery};
use zeroinstall_schema::feed::{Archive, RecipeStep, RetrievalMethod, SingleFile};
use zeroinstall_schema::{Implementation, ManifestDigest};

use crate::config::{Config, NetworkUse};
use crate::errors::{EngineError, Result};
use crate::handler::{CancellationToken, Handler};
use crate::store::Store;

static IN_FLIGHT: Mutex<BTreeSet<(String, String)>> = Mutex::new(BTreeSet::new());
static IN_FLIGHT_CHANGED: Condvar = Condvar::new();

struct DownloadSlot {
    key: Option<(String, String)>,
}

impl Drop for DownloadSlot {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            IN_FLIGHT.lock().unwrap().remove(&key);
            IN_FLIGHT_CHANGED.notify_all();
        }
    }
}

fn acquire_download_slot(key: (String, String)) -> DownloadSlot {
    let mut in_flight = IN_FLIGHT.lock().unwrap();
    while in_flight.contains(&key) {
        in_flight = IN_FLIGHT_CHANGED.wait(in_flight).unwrap();
    }
    in_flight.insert(key.clone());
    DownloadSlot { key: Some(key) }
}

/// Resolves `id` (another implementation's id within the same feed) to
/// its materialized store directory, for `RecipeStep::CopyFrom`. Callers
/// hold the feed the recipe came from and can answer this directly; the
/// fetcher itself has no feed model of its own.
pub trait SiblingResolver {
    /// Locate and, if necessary, fetch the sibling implementation named
    /// by `id`, returning its on-disk root.
    fn resolve(&self, id: &str) -> Result<Utf8PathBuf>;
}

/// Everything the fetcher needs beyond the implementation it's asked to
/// materialize.
pub struct Fetcher<'a> {
    pub store: &'a Store,
    pub client: &'a reqwest::blocking::Client,
    pub config: &'a Config,
    pub native_registry: &'a NativePackageRegistry,
    pub peers: Option<&'a PeerDiscovery>,
    pub handler: &'a dyn Handler,
    pub token: &'a CancellationToken,
}

impl<'a> Fetcher<'a> {
    /// Ensure `implementation` is present, fetching it if needed, and
    /// return its root directory. Native package implementations have no
    /// root directory of their own (their files land wherever the
    /// package manager puts them) and come back as `Ok(None)` once
    /// installed.
    pub fn ensure_available(&self, implementation: &Implementation, siblings: &dyn SiblingResolver) -> Result<Option<Utf8PathBuf>> {
        if let Some(local) = &implementation.local_path {
            return Ok(Some(local.clone()));
        }
        if implementation.is_package() {
            self.install_package(implementation)?;
            return Ok(None);
        }
        if let Some(path) = self.store.get_path(&implementation.manifest_digest)? {
            return Ok(Some(path));
        }
        if self.config.network_use == NetworkUse::Offline {
            return Err(EngineError::NotSupported(
                "network use is disabled (offline) and this implementation is not cached".into(),
            ));
        }

        if let Some(path) = self.try_peers(&implementation.manifest_digest)? {
            return Ok(Some(path));
        }

        let mut methods: Vec<&RetrievalMethod> = implementation.retrieval_methods.iter().collect();
        methods.sort_by_key(|m| m.rank_key());
        if methods.is_empty() {
            return Err(EngineError::NotSupported(format!(
                "implementation {} has no retrieval method and is not cached",
                implementation.id
            )));
        }

        let mut last_error = None;
        for method in methods {
            self.token.check()?;
            match self.try_method(method, &implementation.manifest_digest, siblings) {
                Ok(path) => return Ok(Some(path)),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::NotSupported("every retrieval method failed".into())))
    }

    fn try_peers(&self, digest: &ManifestDigest) -> Result<Option<Utf8PathBuf>> {
        let Some(peers) = self.peers else {
            return Ok(None);
        };
        let Some(store_name) = digest.best_store_name() else {
            return Ok(None);
        };
        let discovered = peers.browse_once()?;
        for peer in discovered {
            self.token.check()?;
            let url = peer.archive_url(&store_name);
            let bytes = match self.http_get(&url) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let archive = Archive {
                href: url,
                mime_type: Some("application/zip".to_owned()),
                size: bytes.len() as u64,
                extract: None,
                destination: None,
                start_offset: 0,
            };
            let path = self
                .store
                .add_archives(&[(archive, bytes)], digest, self.token, self.handler)?;
            return Ok(Some(path));
        }
        Ok(None)
    }

    fn try_method(
        &self,
        method: &RetrievalMethod,
        digest: &ManifestDigest,
        siblings: &dyn SiblingResolver,
    ) -> Result<Utf8PathBuf> {
        let store_name = digest.best_store_name().unwrap_or_default();
        match method {
            RetrievalMethod::Archive(archive) => {
                let bytes = self.download_bytes(&store_name, &archive.href, Some(archive.size))?;
                self.store.add_archives(&[(archive.clone(), bytes)], digest, self.token, self.handler)
            }
            RetrievalMethod::SingleFile(file) => {
                let staging = tempfile::tempdir().map_err(|e| EngineError::io(file.destination.clone(), e))?;
                let root = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
                    .map_err(|_| EngineError::NotSupported("non-UTF8 temporary directory path".into()))?;
                self.place_single_file(file, &store_name, &root)?;
                self.store.add_directory(&root, digest, self.token, self.handler)
            }
            RetrievalMethod::Recipe(recipe) => {
                if recipe.steps.iter().all(|step| matches!(step, RecipeStep::Archive(_))) {
                    let mut archives = Vec::with_capacity(recipe.steps.len());
                    for step in &recipe.steps {
                        let RecipeStep::Archive(archive) = step else {
                            unreachable!("filtered to archive steps above")
                        };
                        let bytes = self.download_bytes(&store_name, &archive.href, Some(archive.size))?;
                        archives.push((archive.clone(), bytes));
                    }
                    return self.store.add_archives(&archives, digest, self.token, self.handler);
                }

                let staging = tempfile::tempdir().map_err(|e| EngineError::io(Utf8PathBuf::from("."), e))?;
                let root = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
                    .map_err(|_| EngineError::NotSupported("non-UTF8 temporary directory path".into()))?;
                for step in &recipe.steps {
                    self.token.check()?;
                    self.apply_recipe_step(step, &store_name, &root, siblings)?;
                }
                self.store.add_directory(&root, digest, self.token, self.handler)
            }
            RetrievalMethod::External(_) => Err(EngineError::NotSupported(
                "external retrieval methods are resolved by the solver's native package registry, not the fetcher".into(),
            )),
        }
    }

    fn apply_recipe_step(
        &self,
        step: &RecipeStep,
        store_name: &str,
        root: &camino::Utf8Path,
        siblings: &dyn SiblingResolver,
    ) -> Result<()> {
        match step {
            RecipeStep::Archive(archive) => {
                let bytes = self.download_bytes(store_name, &archive.href, Some(archive.size))?;
                crate::archive::extract_archive(archive, &bytes, root, self.token)
            }
            RecipeStep::File(file) => self.place_single_file(file, store_name, root),
            RecipeStep::Rename { source, dest } => {
                let from = root.join(source);
                let to = root.join(dest);
                if let Some(parent) = to.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
                }
                std::fs::rename(&from, &to).map_err(|e| EngineError::io(&from, e))
            }
            RecipeStep::Remove { path } => {
                let target = root.join(path);
                if target.is_dir() {
                    std::fs::remove_dir_all(&target).map_err(|e| EngineError::io(&target, e))
                } else {
                    std::fs::remove_file(&target).map_err(|e| EngineError::io(&target, e))
                }
            }
            RecipeStep::CopyFrom { id, source, dest } => {
                let sibling_root = siblings.resolve(id)?;
                let from = sibling_root.join(source);
                let to = root.join(dest);
                if let Some(parent) = to.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
                }
                if from.is_dir() {
                    crate::store::copy_tree(&from, &to)
                } else {
                    std::fs::copy(&from, &to).map(|_| ()).map_err(|e| EngineError::io(&from, e))
                }
            }
        }
    }

    fn place_single_file(&self, file: &SingleFile, store_name: &str, root: &camino::Utf8Path) -> Result<()> {
        let bytes = self.download_bytes(store_name, &file.href, Some(file.size))?;
        let dest = root.join(&file.destination);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        std::fs::write(&dest, &bytes).map_err(|e| EngineError::io(&dest, e))?;
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&dest).map_err(|e| EngineError::io(&dest, e))?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(&dest, perms).map_err(|e| EngineError::io(&dest, e))?;
        }
        Ok(())
    }

    fn install_package(&self, implementation: &Implementation) -> Result<()> {
        let Some(RetrievalMethod::External(ext)) = implementation.retrieval_methods.first() else {
            return Err(EngineError::NotSupported(
                "package implementation carries no external retrieval method".into(),
            ));
        };
        let candidates = self.native_registry.query(&ext.package, &ext.distributions)?;
        let candidate = candidates
            .into_iter()
            .find(|c| c.id == implementation.id)
            .ok_or_else(|| EngineError::NotFound(format!("native package candidate {} is no longer offered", implementation.id)))?;

        if candidate.installed {
            return Ok(());
        }
        if !self.handler.confirm(&format!("Install native package {} to satisfy this dependency?", candidate.id)) {
            return Err(EngineError::OperationCanceled);
        }
        self.native_registry.install(&candidate, &ext.distributions)
    }

    fn download_bytes(&self, store_name: &str, href: &str, expected_size: Option<u64>) -> Result<Vec<u8>> {
        let key = (store_name.to_owned(), href.to_owned());
        let _slot = acquire_download_slot(key);
        self.token.check()?;

        match self.http_get(href) {
            Ok(bytes) => {
                self.handler.progress(href, bytes.len() as u64, expected_size.unwrap_or(bytes.len() as u64));
                Ok(bytes)
            }
            Err(err) => {
                if err.is_mirror_retryable() {
                    if let Some(mirror) = &self.config.feed_mirror {
                        if let Some(mirror_href) = mirror_url(mirror, href) {
                            return self.http_get(&mirror_href);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn http_get(&self, href: &str) -> Result<Vec<u8>> {
        let response = self.client.get(href).send().map_err(|e| EngineError::network(href, e))?;
        let response = response
            .error_for_status()
            .map_err(|e| EngineError::Network {
                url: href.to_owned(),
                status: e.status().map(|s| s.as_u16()),
                source: e,
            })?;
        let bytes = response.bytes().map_err(|e| EngineError::network(href, e))?;
        Ok(bytes.to_vec())
    }
}

/// Build the feed-mirror fallback URL for `href` (spec.md §4.6 "Mirror
/// fallback"): `<mirror>/archive/<scheme>/<host>/<path>`. Only applies to
/// non-loopback http/https URLs; anything else has no mirror-equivalent
/// and returns `None` so the caller falls back to the original error.
fn mirror_url(mirror: &str, href: &str) -> Option<String> {
    let parsed = url::Url::parse(href).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?;
    if is_loopback_host(host) {
        return None;
    }
    Some(format!(
        "{}/archive/{}/{}/{}",
        mirror.trim_end_matches('/'),
        parsed.scheme(),
        host,
        parsed.path().trim_start_matches('/')
    ))
}

/// True for `localhost` and loopback IP literals, which are carved out of
/// mirror fallback: a local dev server has no mirror to fall back to.
fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<std::net::IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_url_has_scheme_host_and_path() {
        let url = mirror_url("https://mirror.example/0mirror", "https://example.com/dl/app-1.0.tar.gz").unwrap();
        assert_eq!(url, "https://mirror.example/0mirror/archive/https/example.com/dl/app-1.0.tar.gz");
    }

    #[test]
    fn mirror_url_rejects_unparseable_href() {
        assert!(mirror_url("https://mirror.example", "not a url").is_none());
    }

    #[test]
    fn mirror_url_rejects_loopback_host() {
        assert!(mirror_url("https://mirror.example", "http://localhost:8080/app.tar.gz").is_none());
        assert!(mirror_url("https://mirror.example", "http://127.0.0.1/app.tar.gz").is_none());
        assert!(mirror_url("https://mirror.example", "http://[::1]/app.tar.gz").is_none());
    }

    #[test]
    fn mirror_url_rejects_non_http_scheme() {
        assert!(mirror_url("https://mirror.example", "ftp://example.com/app.tar.gz").is_none());
    }

    #[test]
    fn download_slot_serializes_same_key() {
        let key = ("sha256new_abc".to_owned(), "https://example.com/a.tar.gz".to_owned());
        let slot = acquire_download_slot(key.clone());
        assert!(IN_FLIGHT.lock().unwrap().contains(&key));
        drop(slot);
        assert!(!IN_FLIGHT.lock().unwrap().contains(&key));
    }
}
