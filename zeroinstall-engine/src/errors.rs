//! Error kinds (spec.md §7), not exception class names: each models one
//! of the documented propagation rules rather than one underlying crate.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// An alias for the common Result type for this crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors the engine surfaces. Every I/O-touching subsystem converts its
/// underlying errors into one of these, per the kinds spec.md §7 names.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum EngineError {
    /// Disk, permissions, path length.
    #[error("I/O error at {path}")]
    Io {
        /// The path the operation was on, when known.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// DNS, connect, HTTP status. Carries the status so callers can
    /// decide whether a mirror retry makes sense (spec.md §4.6).
    #[error("network error fetching {url}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The HTTP status, if the request reached the server.
        status: Option<u16>,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Malformed XML or manifest line.
    #[error("failed to parse {what}")]
    #[diagnostic(help("{detail}"))]
    ParseError {
        /// What was being parsed (a feed URI, a manifest line, ...).
        what: String,
        /// A human-readable detail of what went wrong.
        detail: String,
    },

    /// Malformed signature block, no valid signature, or no trusted
    /// signature (spec.md §4.3).
    #[error("signature error: {0}")]
    SignatureError(String),

    /// Computed digest didn't match the expected one. Fatal for the
    /// current retrieval method, not necessarily for the whole fetch
    /// (spec.md §4.6: "catches `DigestMismatch` per retrieval method and
    /// tries the next").
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// The digest the feed declared.
        expected: String,
        /// The digest actually computed from the fetched bytes.
        computed: String,
    },

    /// Unknown archive MIME, unknown digest algorithm, unimplemented OS
    /// feature.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Feed absent both online and in cache; implementation absent from
    /// all stores when expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// No satisfying assignment. Carries the conflict trace (spec.md
    /// §4.7: "a `SolverException` containing the conflict chain and the
    /// rejection reason for each rejected candidate of the failing
    /// interface").
    #[error("no implementations satisfy the requirements for {interface}")]
    #[diagnostic(help("rejected candidates:\n{}", rejections.join("\n")))]
    SolverError {
        /// The interface that could not be solved.
        interface: String,
        /// One line per rejected candidate, naming the reason.
        rejections: Vec<String>,
    },

    /// User-initiated cancellation.
    #[error("operation canceled")]
    Canceled,

    /// The user declined a required confirmation (signature trust,
    /// native package install).
    #[error("operation declined by user")]
    OperationCanceled,

    /// A lower-level native-host error (base directories, architecture
    /// detection, peer discovery).
    #[error(transparent)]
    Native(#[from] zeroinstall_native::NativeError),

    /// A malformed entry in a [`zeroinstall_schema::manifest::Manifest`].
    #[error(transparent)]
    Manifest(#[from] zeroinstall_schema::manifest::ManifestError),
}

impl EngineError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> EngineError {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a `reqwest` error as a [`EngineError::Network`], carrying
    /// its HTTP status if the failure was a response rather than a
    /// transport error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> EngineError {
        let status = source.status().map(|s| s.as_u16());
        EngineError::Network {
            url: url.into(),
            status,
            source,
        }
    }

    /// True for network errors worth retrying against a mirror (spec.md
    /// §4.6: "On `WebError` that is not 401/403 and for non-loopback
    /// http/https, retry once against the mirror").
    pub fn is_mirror_retryable(&self) -> bool {
        match self {
            EngineError::Network { status, .. } => !matches!(status, Some(401) | Some(403)),
            _ => false,
        }
    }
}
