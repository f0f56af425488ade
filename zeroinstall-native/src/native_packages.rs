//! The native package provider boundary (spec.md §4.7 step 2, and the
//! explicit Non-goal "OS-level package manager probes beyond an abstract
//! 'native package provider'"). This module defines the contract the
//! solver queries through; it deliberately does not talk to `dpkg`, `rpm`
//! or `brew` itself — a concrete provider is supplied by the embedding
//! application, the same way `cargo-dist`'s `PackageInfo` distinguishes
//! discovering a workspace from building it.

use zeroinstall_schema::ImplementationVersion;

use crate::errors::Result;

/// One candidate implementation a native package manager can offer for a
/// feed's `<package-implementation>` element (spec.md §4.7 step 2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeCandidate {
    /// Opaque id, always of the form `package:<manager>:<name>:<version>`
    /// (spec.md §3 "a distro package ID prefixed with `package:`").
    pub id: String,
    /// The version the package manager reports.
    pub version: ImplementationVersion,
    /// Whether this candidate is already installed, as opposed to
    /// merely available to install.
    pub installed: bool,
}

/// A source of native-package candidates for a `<package-implementation>`
/// element. Implemented by the embedding application; this crate ships no
/// concrete provider (probing `dpkg`/`rpm`/`brew` is explicitly out of
/// scope).
pub trait NativePackageProvider: Send + Sync {
    /// The `distributions` token this provider answers for, e.g. `"deb"`
    /// or `"rpm"` (spec.md §4.7 step 2's `distributions=` attribute).
    fn distribution(&self) -> &str;

    /// Candidates this provider can offer for `package`, the feed's
    /// `package=` attribute.
    fn query(&self, package: &str) -> Result<Vec<NativeCandidate>>;

    /// Invoke the native installer for `candidate`, as directed by
    /// spec.md §4.8 step 2 ("ask the handler to confirm, then invoke the
    /// native installer callback").
    fn install(&self, candidate: &NativeCandidate) -> Result<()>;
}

/// A registry of providers, queried by the `distributions=` token a feed
/// names (a space-separated list, spec.md §4.7 step 2).
#[derive(Default)]
pub struct NativePackageRegistry {
    providers: Vec<Box<dyn NativePackageProvider>>,
}

impl NativePackageRegistry {
    /// An empty registry, as used when no native package manager is
    /// configured.
    pub fn new() -> Self {
        NativePackageRegistry {
            providers: Vec::new(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, provider: Box<dyn NativePackageProvider>) {
        self.providers.push(provider);
    }

    /// Query every registered provider whose `distribution()` appears in
    /// `distributions`, for `package`.
    pub fn query(&self, package: &str, distributions: &[String]) -> Result<Vec<NativeCandidate>> {
        let mut out = Vec::new();
        for provider in &self.providers {
            if distributions.iter().any(|d| d == provider.distribution()) {
                out.extend(provider.query(package)?);
            }
        }
        Ok(out)
    }

    /// Invoke whichever registered provider answers for `distributions`
    /// to install `candidate` (spec.md §4.8 step 2).
    pub fn install(&self, candidate: &NativeCandidate, distributions: &[String]) -> Result<()> {
        for provider in &self.providers {
            if distributions.iter().any(|d| d == provider.distribution()) {
                return provider.install(candidate);
            }
        }
        Err(crate::errors::NativeError::NoProvider {
            distributions: distributions.join(" "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        dist: &'static str,
        candidates: Vec<NativeCandidate>,
    }

    impl NativePackageProvider for FakeProvider {
        fn distribution(&self) -> &str {
            self.dist
        }
        fn query(&self, _package: &str) -> Result<Vec<NativeCandidate>> {
            Ok(self.candidates.clone())
        }
        fn install(&self, _candidate: &NativeCandidate) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_only_queries_matching_distribution() {
        let mut registry = NativePackageRegistry::new();
        registry.register(Box::new(FakeProvider {
            dist: "deb",
            candidates: vec![NativeCandidate {
                id: "package:deb:curl:7.0".into(),
                version: ImplementationVersion::parse("7.0").unwrap(),
                installed: true,
            }],
        }));
        registry.register(Box::new(FakeProvider {
            dist: "rpm",
            candidates: vec![NativeCandidate {
                id: "package:rpm:curl:7.0".into(),
                version: ImplementationVersion::parse("7.0").unwrap(),
                installed: false,
            }],
        }));

        let found = registry
            .query("curl", &["deb".to_owned()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "package:deb:curl:7.0");
    }

    #[test]
    fn empty_registry_returns_nothing() {
        let registry = NativePackageRegistry::new();
        let found = registry.query("curl", &["deb".to_owned()]).unwrap();
        assert!(found.is_empty());
    }
}
