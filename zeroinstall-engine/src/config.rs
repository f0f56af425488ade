//! Global settings (spec.md §6 "Config"), persisted as the INI-style
//! `global` file under the config basedir (spec.md §6 "Persisted state
//! layout").

use std::time::Duration;

use camino::Utf8Path;
use ini::Ini;

use crate::errors::{EngineError, Result};

/// How freely the engine is allowed to use the network (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NetworkUse {
    /// Use the network whenever it might help, even for a solve that
    /// could succeed from cache.
    Full,
    /// Only use the network when required to make progress.
    #[default]
    Minimal,
    /// Never touch the network; fail rather than fetch.
    Offline,
}

impl NetworkUse {
    fn parse(s: &str) -> Option<NetworkUse> {
        match s {
            "full" => Some(NetworkUse::Full),
            "minimal" => Some(NetworkUse::Minimal),
            "offline" => Some(NetworkUse::Offline),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            NetworkUse::Full => "full",
            NetworkUse::Minimal => "minimal",
            NetworkUse::Offline => "offline",
        }
    }
}

/// Credentials for the optional sync server (spec.md §6 `sync_server and
/// related credentials`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncCredentials {
    /// The sync server's base URI.
    pub server: String,
    /// Username to authenticate with.
    pub username: String,
    /// Password to authenticate with. Stored in plain text in `global`,
    /// matching the reference implementation; callers that want better
    /// secrecy should keep this file's permissions tight.
    pub password: String,
}

/// Global engine settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// How long a cached feed is considered fresh before a refresh is
    /// triggered (spec.md §4.7 "Freshness"), default 7 days.
    pub freshness: Duration,
    /// Network policy (spec.md §6).
    pub network_use: NetworkUse,
    /// If set, the solver's default stability policy relaxes from
    /// `Stable` to `Testing` (spec.md §4.7).
    pub help_with_testing: bool,
    /// If set, new signing keys are trusted without prompting through
    /// the handler (spec.md §4.3 step 4).
    pub auto_approve_keys: bool,
    /// Base URI prepended to build the mirror fallback URL (spec.md
    /// §4.6 "Mirror fallback").
    pub feed_mirror: Option<String>,
    /// URI of the key information service consulted for unknown
    /// fingerprints (spec.md §4.3 step 3).
    pub key_info_server: Option<String>,
    /// Sync server credentials, if configured.
    pub sync: Option<SyncCredentials>,
    /// If set, the handler must never prompt; operations that would
    /// need confirmation fail instead (spec.md §6 `kiosk_mode`).
    pub kiosk_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            freshness: Duration::from_secs(7 * 24 * 60 * 60),
            network_use: NetworkUse::default(),
            help_with_testing: false,
            auto_approve_keys: false,
            feed_mirror: None,
            key_info_server: None,
            sync: None,
            kiosk_mode: false,
        }
    }
}

impl Config {
    /// Load settings from an INI file, falling back to defaults for any
    /// key that's absent or unparsable.
    pub fn load(path: &Utf8Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let ini = Ini::load_from_file(path.as_std_path())
            .map_err(|source| EngineError::ParseError {
                what: path.to_string(),
                detail: source.to_string(),
            })?;
        let section = ini.general_section();
        let mut config = Config::default();

        if let Some(v) = section.get("freshness").and_then(|s| s.parse().ok()) {
            config.freshness = Duration::from_secs(v);
        }
        if let Some(v) = section.get("network_use").and_then(NetworkUse::parse) {
            config.network_use = v;
        }
        if let Some(v) = section.get("help_with_testing") {
            config.help_with_testing = v == "true";
        }
        if let Some(v) = section.get("auto_approve_keys") {
            config.auto_approve_keys = v == "true";
        }
        config.feed_mirror = section.get("feed_mirror").map(str::to_owned);
        config.key_info_server = section.get("key_info_server").map(str::to_owned);
        if let Some(v) = section.get("kiosk_mode") {
            config.kiosk_mode = v == "true";
        }
        if let (Some(server), Some(username), Some(password)) = (
            section.get("sync_server"),
            section.get("sync_username"),
            section.get("sync_password"),
        ) {
            config.sync = Some(SyncCredentials {
                server: server.to_owned(),
                username: username.to_owned(),
                password: password.to_owned(),
            });
        }

        Ok(config)
    }

    /// Write settings back to an INI file, atomically (temp file +
    /// rename), the same write discipline the Trust and Feed Cache
    /// subsystems use (spec.md §5 "persistent via atomic replace").
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let mut ini = Ini::new();
        {
            let section = ini.with_general_section();
            section.set("freshness", self.freshness.as_secs().to_string());
            section.set("network_use", self.network_use.as_str());
            section.set("help_with_testing", self.help_with_testing.to_string());
            section.set("auto_approve_keys", self.auto_approve_keys.to_string());
            section.set("kiosk_mode", self.kiosk_mode.to_string());
            if let Some(mirror) = &self.feed_mirror {
                section.set("feed_mirror", mirror);
            }
            if let Some(server) = &self.key_info_server {
                section.set("key_info_server", server);
            }
            if let Some(sync) = &self.sync {
                section.set("sync_server", &sync.server);
                section.set("sync_username", &sync.username);
                section.set("sync_password", &sync.password);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        ini.write_to_file(tmp.as_std_path())
            .map_err(|e| EngineError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.freshness, Duration::from_secs(604_800));
        assert_eq!(config.network_use, NetworkUse::Minimal);
        assert!(!config.help_with_testing);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("global");

        let mut config = Config::default();
        config.help_with_testing = true;
        config.network_use = NetworkUse::Offline;
        config.feed_mirror = Some("https://mirror.example.com".to_owned());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.help_with_testing);
        assert_eq!(loaded.network_use, NetworkUse::Offline);
        assert_eq!(loaded.feed_mirror.as_deref(), Some("https://mirror.example.com"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("nonexistent");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.network_use, NetworkUse::Minimal);
    }
}
