#![deny(missing_docs)]

//! # zeroinstall-schema
//!
//! The data model shared by every part of the Zero Install engine: feeds,
//! implementations, versions, manifests and selections. This crate does no
//! I/O of its own — it exists so that `zeroinstall-engine` and any future
//! consumer agree on one set of types, the same way `cargo-dist-schema` is
//! the single source of truth for `DistManifest`.
//!
//! The root types are [`Feed`], [`Requirements`], [`Selections`] and
//! [`Manifest`].

#[macro_use]
mod macros;

pub mod arch;
pub mod digest;
pub mod feed;
pub mod manifest;
pub mod preferences;
pub mod requirements;
pub mod selections;
pub mod trust;
pub mod uri;
pub mod version;

pub use arch::{Architecture, Cpu, Os, Stability};
pub use digest::{ManifestDigest, ManifestFormat};
pub use feed::{
    Binding, Command, Dependency, Feed, Group, Implementation, Importance, Recipe,
    RecipeStep, Restriction, RetrievalMethod,
};
pub use manifest::{Manifest, ManifestEntry};
pub use preferences::{FeedPreferences, ImplementationPreferences, InterfacePreferences};
pub use requirements::Requirements;
pub use selections::{ImplementationSelection, Selections, SelectionsDiff};
pub use trust::{Domain, TrustDb};
pub use uri::FeedUri;
pub use version::{ImplementationVersion, VersionRange};
