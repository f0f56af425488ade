//! # zeroinstall-native
//!
//! Everything that touches the specific machine this process runs on:
//! architecture detection, base directory layout, the native package
//! provider boundary, and local peer discovery. `zeroinstall-schema`
//! defines the shapes; this crate is where they meet the host, the same
//! split `axoproject` draws between describing a workspace and
//! `cargo-dist` actually building on one.

pub mod basedirs;
pub mod errors;
pub mod native_packages;
pub mod platforms;

#[cfg(feature = "peer-discovery")]
pub mod peer_discovery;

pub use basedirs::{CacheDirs, ConfigDirs};
pub use errors::{NativeError, Result};
pub use native_packages::{NativeCandidate, NativePackageProvider, NativePackageRegistry};
pub use platforms::host_architecture;

#[cfg(feature = "peer-discovery")]
pub use peer_discovery::{Peer, PeerDiscovery};
