//! Resolves the on-disk layout for config, cache and persisted state
//! (spec.md §6 "Base directories"), following the XDG Base Directory
//! Specification with the `0install.net` namespace the protocol mandates.

use camino::{Utf8Path, Utf8PathBuf};

use zeroinstall_schema::FeedUri;

use crate::errors::{NativeError, Result};

const NAMESPACE: &str = "0install.net";

/// The three base directories this crate resolves, named the way
/// `errors::NativeError::NoBaseDir` reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Config,
    Cache,
    Data,
}

impl Kind {
    fn env_var(self) -> &'static str {
        match self {
            Kind::Config => "XDG_CONFIG_HOME",
            Kind::Cache => "XDG_CACHE_HOME",
            Kind::Data => "XDG_DATA_HOME",
        }
    }

    fn home_fallback(self) -> &'static str {
        match self {
            Kind::Config => ".config",
            Kind::Cache => ".cache",
            Kind::Data => ".local/share",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kind::Config => "config",
            Kind::Cache => "cache",
            Kind::Data => "data",
        }
    }
}

fn base_dir(kind: Kind) -> Result<Utf8PathBuf> {
    if let Ok(value) = std::env::var(kind.env_var()) {
        if !value.is_empty() {
            return Ok(Utf8PathBuf::from(value));
        }
    }
    let home = homedir::my_home()
        .ok()
        .flatten()
        .ok_or(NativeError::NoBaseDir { kind: kind.label() })?;
    let home = Utf8PathBuf::from_path_buf(home)
        .map_err(|_| NativeError::NoBaseDir { kind: kind.label() })?;
    Ok(home.join(kind.home_fallback()))
}

/// Resolves paths under `<config>/0install.net/injector/...`.
pub struct ConfigDirs {
    root: Utf8PathBuf,
}

impl ConfigDirs {
    /// Locate the config root, creating no directories.
    pub fn locate() -> Result<ConfigDirs> {
        Ok(ConfigDirs {
            root: base_dir(Kind::Config)?.join(NAMESPACE).join("injector"),
        })
    }

    /// The config root itself (`<config>/0install.net/injector`).
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Global settings file (`global`).
    pub fn global_config(&self) -> Utf8PathBuf {
        self.root.join("global")
    }

    /// The trust database file (`trust`).
    pub fn trust_db(&self) -> Utf8PathBuf {
        self.root.join("trust")
    }

    /// Per-interface preferences file (`interfaces/<escaped uri>`).
    pub fn interface_preferences(&self, interface: &FeedUri) -> Utf8PathBuf {
        self.root.join("interfaces").join(interface.escaped())
    }

    /// Per-feed preferences file (`feeds/<escaped uri>`).
    pub fn feed_preferences(&self, feed: &FeedUri) -> Utf8PathBuf {
        self.root.join("feeds").join(feed.escaped())
    }
}

/// Resolves paths under `<cache>/0install.net/...`.
pub struct CacheDirs {
    root: Utf8PathBuf,
}

impl CacheDirs {
    /// Locate the cache root, creating no directories.
    pub fn locate() -> Result<CacheDirs> {
        Ok(CacheDirs {
            root: base_dir(Kind::Cache)?.join(NAMESPACE),
        })
    }

    /// The cache root itself (`<cache>/0install.net`).
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Cached copy of a feed document (`interfaces/<escaped uri>`).
    pub fn cached_feed(&self, feed: &FeedUri) -> Utf8PathBuf {
        self.root.join("interfaces").join(feed.escaped())
    }

    /// The implementation store root (`implementations`), holding one
    /// directory per `<algorithm>=<digest>` (spec.md §4.2).
    pub fn implementations_root(&self) -> Utf8PathBuf {
        self.root.join("implementations")
    }

    /// The on-disk directory for one implementation, named by its
    /// preferred manifest digest's store name (spec.md §4.2
    /// `best_store_name`).
    pub fn implementation_dir(&self, store_name: &str) -> Utf8PathBuf {
        self.implementations_root().join(store_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_paths_are_scoped_under_injector() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/zi-test-config");
        let dirs = ConfigDirs::locate().unwrap();
        assert_eq!(dirs.root(), "/tmp/zi-test-config/0install.net/injector");
        assert_eq!(
            dirs.global_config(),
            "/tmp/zi-test-config/0install.net/injector/global"
        );
        assert_eq!(
            dirs.trust_db(),
            "/tmp/zi-test-config/0install.net/injector/trust"
        );
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    fn cache_paths_escape_feed_uris() {
        std::env::set_var("XDG_CACHE_HOME", "/tmp/zi-test-cache");
        let dirs = CacheDirs::locate().unwrap();
        let feed = FeedUri::new("http://example.com/app.xml".to_owned());
        let cached = dirs.cached_feed(&feed);
        assert!(cached.as_str().ends_with(&feed.escaped()));
        assert!(!cached.as_str().contains("://"));
        std::env::remove_var("XDG_CACHE_HOME");
    }
}
