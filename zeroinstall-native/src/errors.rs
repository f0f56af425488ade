//! Errors raised while probing the host for platform, package-manager, or
//! peer information.

use camino::Utf8PathBuf;
use thiserror::Error;

/// A Result returned by this crate.
pub type Result<T> = std::result::Result<T, NativeError>;

/// An error raised while probing host-native facilities.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NativeError {
    /// Couldn't determine a base directory (e.g. `$HOME` unset).
    #[error("couldn't determine the {kind} base directory")]
    NoBaseDir {
        /// Which kind of base directory (config/cache/data) was being
        /// resolved.
        kind: &'static str,
    },

    /// A base directory exists but isn't usable (not a directory, wrong
    /// permissions).
    #[error("base directory {path} is not usable: {details}")]
    BadBaseDir {
        /// The offending path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        details: std::io::Error,
    },

    /// Running a native package manager query failed.
    #[error("failed to query the native package manager {manager}")]
    PackageQueryFailed {
        /// Name of the package manager invoked (`dpkg`, `rpm`, ...).
        manager: &'static str,
        /// The underlying I/O error launching the process.
        #[source]
        details: std::io::Error,
    },

    /// Peer discovery couldn't bind its multicast socket.
    #[cfg(feature = "peer-discovery")]
    #[error("peer discovery failed to start")]
    DiscoveryUnavailable(#[from] mdns_sd::Error),

    /// No registered provider answers for any of the requested
    /// distributions.
    #[error("no native package provider registered for distributions: {distributions}")]
    NoProvider {
        /// The space-separated `distributions=` token that went unanswered.
        distributions: String,
    },
}
