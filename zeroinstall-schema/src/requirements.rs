//! The solver's input value (spec.md §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::uri::FeedUri;
use crate::version::VersionRange;

/// What the caller wants solved: an interface, a command on it, the host
/// it'll run on, and any extra constraints beyond what the feeds impose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// The root interface to solve for.
    pub interface_uri: FeedUri,
    /// The command to resolve on the root interface, default `"run"`.
    pub command: String,
    /// Host architecture candidates are matched against.
    pub architecture: Architecture,
    /// Acceptable languages, most preferred first.
    pub languages: Vec<String>,
    /// Per-interface version restrictions beyond what feeds declare,
    /// keyed by interface URI, intersected with any restriction already
    /// imposed by a dependency on that interface.
    pub extra_restrictions: BTreeMap<FeedUri, VersionRange>,
    /// If true, only source implementations satisfy the solve.
    pub source: bool,
}

impl Requirements {
    /// The default command name used when none is specified.
    pub const DEFAULT_COMMAND: &'static str = "run";

    /// A minimal `Requirements` for `interface_uri` on `architecture`,
    /// with the default command and no extra constraints.
    pub fn new(interface_uri: FeedUri, architecture: Architecture) -> Self {
        Requirements {
            interface_uri,
            command: Self::DEFAULT_COMMAND.to_owned(),
            architecture,
            languages: Vec::new(),
            extra_restrictions: BTreeMap::new(),
            source: false,
        }
    }

    /// The version range constraining `interface`, combining any
    /// `extra_restrictions` entry with `other` (typically a dependency's
    /// own restriction).
    pub fn combined_restriction(&self, interface: &FeedUri, other: &VersionRange) -> VersionRange {
        match self.extra_restrictions.get(interface) {
            Some(extra) => extra.intersect(other),
            None => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Cpu, Os};

    #[test]
    fn new_uses_default_command() {
        let req = Requirements::new(
            FeedUri::new("https://example.com/app.xml".into()),
            Architecture::new(Os::Linux, Cpu::X86_64),
        );
        assert_eq!(req.command, "run");
        assert!(!req.source);
    }

    #[test]
    fn combined_restriction_intersects_extra_with_dependency() {
        let mut req = Requirements::new(
            FeedUri::new("https://example.com/app.xml".into()),
            Architecture::new(Os::Linux, Cpu::X86_64),
        );
        let lib = FeedUri::new("https://example.com/lib.xml".into());
        req.extra_restrictions
            .insert(lib.clone(), VersionRange::parse_range_expr("1.0..!3.0").unwrap());

        let dep_restriction = VersionRange::parse_range_expr("2.0..!4.0").unwrap();
        let combined = req.combined_restriction(&lib, &dep_restriction);
        let v = crate::version::ImplementationVersion::parse;
        assert!(combined.matches(&v("2.5").unwrap()));
        assert!(!combined.matches(&v("1.5").unwrap()));
        assert!(!combined.matches(&v("3.5").unwrap()));
    }
}
