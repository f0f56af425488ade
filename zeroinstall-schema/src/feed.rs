//! The feed document data model: [`Feed`], [`Group`], [`Implementation`],
//! and everything an implementation can carry — commands, dependencies,
//! bindings, and retrieval methods (spec.md §3, §6).

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::arch::{Architecture, Stability};
use crate::digest::ManifestDigest;
use crate::uri::FeedUri;
use crate::version::{ImplementationVersion, VersionRange};

/// How strongly a dependency is required (`<requires importance=>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// The dependency must be solved or the whole solve fails.
    Essential,
    /// Solved opportunistically; the dependent still runs without it.
    Recommended,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Essential
    }
}

/// Localized piece of feed metadata (`xml:lang=` attribute plus text).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localized {
    /// BCP-47 language tag, empty string for the unmarked default.
    pub lang: String,
    /// The text itself.
    pub text: String,
}

/// `<icon href= type=>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    /// Where to fetch the icon from.
    pub href: String,
    /// Its MIME type, e.g. `image/png`.
    pub mime_type: Option<String>,
}

/// A version-and-platform restriction attached to a dependency, or
/// standalone as `<restricts>` (a constraint with no new dependency).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    /// The interface this restriction narrows.
    pub interface: FeedUri,
    /// Acceptable version range, default unconstrained.
    pub versions: Option<VersionRange>,
    /// If set, only implementations for this OS may satisfy the
    /// restriction (independent of the dependent's own architecture).
    pub os: Option<String>,
    /// If set, only packages from these distributions (e.g. `deb`) may
    /// satisfy the restriction.
    pub distributions: Vec<String>,
}

impl Default for Restriction {
    fn default() -> Self {
        Restriction {
            interface: FeedUri::new(String::new()),
            versions: None,
            os: None,
            distributions: Vec::new(),
        }
    }
}

/// An environment variable manipulation applied when a selection is used
/// (`<environment>`), or a binding exposing an implementation's own path
/// (`<executable-in-*>`, `<overlay>`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Binding {
    /// Set, prepend, or append to an environment variable.
    Environment {
        /// The variable name.
        name: String,
        /// Path within the implementation to insert, relative to its
        /// root; `None` inserts the root itself.
        insert: Option<Utf8PathBuf>,
        /// Literal value to insert instead of a path.
        value: Option<String>,
        /// How to combine with any existing value.
        mode: EnvironmentMode,
        /// Separator between joined values, default the OS path separator.
        separator: Option<String>,
        /// Value to use if the variable wasn't previously set, for
        /// `mode: Replace`.
        default: Option<String>,
    },
    /// Expose a runnable wrapper for `name` pointing at the
    /// implementation's own executable, set as an environment variable.
    ExecutableInVar {
        /// The variable to receive the wrapper's path.
        name: String,
        /// Command within the implementation to wrap, default `run`.
        command: String,
    },
    /// Like `ExecutableInVar`, but the wrapper is placed on `PATH` instead
    /// of recorded in a named variable.
    ExecutableInPath {
        /// The filename under which to expose the wrapper.
        name: String,
        /// Command within the implementation to wrap, default `run`.
        command: String,
    },
    /// Mount (copy/symlink) part of this implementation into the
    /// dependent's own tree.
    Overlay {
        /// Subdirectory of this implementation to expose, default root.
        src: Option<Utf8PathBuf>,
        /// Where under the dependent to mount it.
        mount_point: Utf8PathBuf,
    },
}

/// How an [`Binding::Environment`] combines with a pre-existing value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentMode {
    /// Discard any existing value.
    Replace,
    /// New value, separator, then existing value.
    Prepend,
    /// Existing value, separator, then new value.
    Append,
}

/// A required interface (`<requires>`), with the restriction it imposes
/// and the bindings it introduces if solved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// How strongly this dependency must be satisfied.
    pub importance: Importance,
    /// The version/platform/distribution constraint.
    pub restriction: Restriction,
    /// Environment/overlay bindings granted once solved.
    pub bindings: Vec<Binding>,
}

/// `<command name= path=>`: a named entry point of an implementation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// The command's name, e.g. `run` or `compile`.
    pub name: String,
    /// Path to the executable, relative to the implementation root.
    /// Absent for commands that only exist to pull in a runner + args.
    pub path: Option<Utf8PathBuf>,
    /// Literal arguments always passed ahead of caller-supplied ones.
    pub arguments: Vec<String>,
    /// `<runner>`: another command (possibly in a different interface)
    /// used to execute `path`, e.g. a JVM running a `.jar`.
    pub runner: Option<Box<Runner>>,
    /// Additional dependencies scoped to running this command.
    pub dependencies: Vec<Dependency>,
    /// Additional bindings scoped to running this command.
    pub bindings: Vec<Binding>,
}

/// `<runner interface= command=>` plus its own `<arg>` children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// The interface providing the runner implementation.
    pub interface: FeedUri,
    /// The runner's own command to invoke, default `run`.
    pub command: String,
    /// Arguments inserted before the thing being run.
    pub arguments: Vec<String>,
    /// Version constraint on the runner implementation.
    pub versions: Option<VersionRange>,
}

impl Default for Runner {
    fn default() -> Self {
        Runner {
            interface: FeedUri::new(String::new()),
            command: String::new(),
            arguments: Vec::new(),
            versions: None,
        }
    }
}

/// `<archive href= type= size= extract= dest= start-offset=>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Where to download the archive from.
    pub href: String,
    /// MIME type, used to pick an Extractor; guessed from `href` if absent.
    pub mime_type: Option<String>,
    /// Download size in bytes, used for `RetrievalMethod` ranking.
    pub size: u64,
    /// If set, strip this leading path component from every entry.
    pub extract: Option<String>,
    /// If set, place contents under this subdirectory instead of the
    /// implementation root.
    pub destination: Option<Utf8PathBuf>,
    /// Bytes to skip before the archive payload begins (self-extracting
    /// installers with a stub prefix).
    pub start_offset: u64,
}

/// `<file href= size= dest= executable=>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleFile {
    /// Where to download the file from.
    pub href: String,
    /// Expected size in bytes.
    pub size: u64,
    /// Destination path within the implementation.
    pub destination: Utf8PathBuf,
    /// Whether the executable bit should be set once placed.
    pub executable: bool,
}

/// One step of a `<recipe>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RecipeStep {
    /// Download and overlay an archive.
    Archive(Archive),
    /// Download and place a single file.
    File(SingleFile),
    /// Move a path within the working tree.
    Rename {
        /// Existing path.
        source: Utf8PathBuf,
        /// New path.
        dest: Utf8PathBuf,
    },
    /// Delete a path from the working tree.
    Remove {
        /// Path to delete, recursively if it's a directory.
        path: Utf8PathBuf,
    },
    /// Copy a path out of another, already-resolved implementation in the
    /// same feed.
    CopyFrom {
        /// `id` of the source implementation within this feed.
        id: String,
        /// Path within the source implementation.
        source: Utf8PathBuf,
        /// Destination path in the working tree.
        dest: Utf8PathBuf,
    },
}

/// `<recipe>`: an ordered sequence of tree-building steps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Steps, applied in document order.
    pub steps: Vec<RecipeStep>,
}

/// `<package-implementation package= distributions=>`: defer to the
/// native package manager instead of fetching an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRetrievalMethod {
    /// The distro package name to install.
    pub package: String,
    /// Restrict to these distributions (`deb`, `rpm`, ...), empty means
    /// any distribution the native provider recognizes.
    pub distributions: Vec<String>,
}

/// One of an implementation's `retrieval_methods` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RetrievalMethod {
    /// See [`Archive`].
    Archive(Archive),
    /// See [`SingleFile`].
    SingleFile(SingleFile),
    /// See [`Recipe`].
    Recipe(Recipe),
    /// See [`ExternalRetrievalMethod`].
    External(ExternalRetrievalMethod),
}

impl RetrievalMethod {
    /// Total download size used by the Fetcher's ranking rule (spec.md
    /// §4.6): downloads rank by size, recipes by step count, and an
    /// external method never competes on size (it always sorts last).
    pub fn rank_key(&self) -> (u8, u64) {
        match self {
            RetrievalMethod::Archive(a) => (0, a.size),
            RetrievalMethod::SingleFile(f) => (0, f.size),
            RetrievalMethod::Recipe(r) => (1, r.steps.len() as u64),
            RetrievalMethod::External(_) => (2, 0),
        }
    }
}

/// Defaults a [`Group`] contributes to every descendant `Implementation`.
/// Each field is applied top-down; a more specific level overrides only
/// the fields it sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefaults {
    /// Inherited architecture, if the group constrains one.
    pub architecture: Option<Architecture>,
    /// Inherited stability rating.
    pub stability: Option<Stability>,
    /// Version prefix prepended to descendant implementations' `id`s that
    /// don't already look like a full identifier (rare, kept for feeds
    /// that rely on it).
    pub version_prefix: Option<String>,
    /// Inherited license identifier.
    pub license: Option<String>,
    /// Inherited commands, merged (descendant commands of the same name
    /// override).
    pub commands: BTreeMap<String, Command>,
    /// Inherited dependencies, concatenated with the descendant's own.
    pub dependencies: Vec<Dependency>,
    /// Inherited restrictions, concatenated with the descendant's own.
    pub restrictions: Vec<Restriction>,
    /// Inherited bindings, concatenated with the descendant's own.
    pub bindings: Vec<Binding>,
    /// Inherited languages.
    pub languages: Vec<String>,
}

/// One node of a [`Feed`]'s element tree: either a nested `Group` or a
/// concrete `Implementation`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Element {
    /// See [`Group`].
    Group(Group),
    /// See [`Implementation`].
    Implementation(Implementation),
}

/// `<group>`: carries inherited defaults for its descendants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Defaults this group layer contributes.
    pub defaults: GroupDefaults,
    /// Nested groups and implementations, in document order.
    pub elements: Vec<Element>,
}

/// A concrete installable artifact (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Opaque identifier, often `<algorithm>=<digest>` or
    /// `package:<name>`.
    pub id: String,
    /// The version this implementation provides.
    pub version: ImplementationVersion,
    /// Release date, if the feed specified one, as an ISO-8601 date
    /// string (kept opaque; the solver never needs to parse it).
    pub released: Option<String>,
    /// Host platform this implementation runs on; `None` means it was
    /// never constrained by any ancestor group (equivalent to `*-*`).
    pub architecture: Option<Architecture>,
    /// Ordered set of BCP-47 language tags this implementation supports.
    pub languages: Vec<String>,
    /// Quality/maturity rating.
    pub stability: Stability,
    /// Content digests identifying this implementation's materialized
    /// directory.
    pub manifest_digest: ManifestDigest,
    /// Ways to obtain this implementation's contents, tried in ranked
    /// order (spec.md §4.6).
    pub retrieval_methods: Vec<RetrievalMethod>,
    /// Named entry points.
    pub commands: BTreeMap<String, Command>,
    /// Interfaces this implementation depends on.
    pub dependencies: Vec<Dependency>,
    /// Constraints this implementation imposes without introducing a new
    /// dependency (`<restricts>`).
    pub restrictions: Vec<Restriction>,
    /// Environment/overlay bindings this implementation grants whenever
    /// it's selected (independent of any command).
    pub bindings: Vec<Binding>,
    /// If set, a local directory substitutes for a store lookup — used
    /// for `0install add-feed`-style local development overrides.
    pub local_path: Option<Utf8PathBuf>,
    /// True if this is a source release rather than a binary (affects
    /// `requirements.source` filtering).
    pub is_source: bool,
}

impl Implementation {
    /// True if `id` names a distro-native package rather than a
    /// content-addressed archive implementation (spec.md §4.6 step 2).
    pub fn is_package(&self) -> bool {
        self.id.starts_with("package:")
    }
}

/// A parsed feed document (spec.md §3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// Self-identifying URI; must match the URL it was fetched from after
    /// normalization, or the feed is rejected (spec.md invariant).
    pub uri: FeedUri,
    /// Canonical program name.
    pub name: String,
    /// Localized one-line summaries.
    pub summaries: Vec<Localized>,
    /// Localized long-form descriptions.
    pub descriptions: Vec<Localized>,
    /// Project homepage URL.
    pub homepage: Option<String>,
    /// Icons at various sizes/formats.
    pub icons: Vec<Icon>,
    /// Freeform category tags.
    pub categories: BTreeSet<String>,
    /// Interfaces this feed extends (`<feed-for>`); set when this feed is
    /// a third-party add-on (e.g. distro packaging) for another program.
    pub feed_for: BTreeSet<FeedUri>,
    /// Additional feeds to consult alongside this one (`<feed src=>`).
    pub feeds: Vec<FeedUri>,
    /// Whether this feed publishes source implementations.
    pub needs_terminal: bool,
    /// Top-level groups and implementations, in document order.
    pub elements: Vec<Element>,
}

impl Default for Feed {
    fn default() -> Self {
        Feed {
            uri: FeedUri::new(String::new()),
            name: String::new(),
            summaries: Vec::new(),
            descriptions: Vec::new(),
            homepage: None,
            icons: Vec::new(),
            categories: BTreeSet::new(),
            feed_for: BTreeSet::new(),
            feeds: Vec::new(),
            needs_terminal: false,
            elements: Vec::new(),
        }
    }
}

impl Feed {
    /// Flatten the element tree into `(defaults-applied Implementation)`
    /// values, applying each ancestor `Group`'s inherited fields top-down
    /// (spec.md §4.7 step 3).
    pub fn flatten_implementations(&self) -> Vec<Implementation> {
        let mut out = Vec::new();
        flatten_elements(&self.elements, &GroupDefaults::default(), &mut out);
        out
    }
}

fn flatten_elements(elements: &[Element], inherited: &GroupDefaults, out: &mut Vec<Implementation>) {
    for element in elements {
        match element {
            Element::Group(group) => {
                let merged = merge_defaults(inherited, &group.defaults);
                flatten_elements(&group.elements, &merged, out);
            }
            Element::Implementation(implementation) => {
                out.push(apply_defaults(inherited, implementation.clone()));
            }
        }
    }
}

fn merge_defaults(parent: &GroupDefaults, child: &GroupDefaults) -> GroupDefaults {
    let mut commands = parent.commands.clone();
    commands.extend(child.commands.clone());
    GroupDefaults {
        architecture: child.architecture.clone().or_else(|| parent.architecture.clone()),
        stability: child.stability.or(parent.stability),
        version_prefix: child.version_prefix.clone().or_else(|| parent.version_prefix.clone()),
        license: child.license.clone().or_else(|| parent.license.clone()),
        commands,
        dependencies: [parent.dependencies.clone(), child.dependencies.clone()].concat(),
        restrictions: [parent.restrictions.clone(), child.restrictions.clone()].concat(),
        bindings: [parent.bindings.clone(), child.bindings.clone()].concat(),
        languages: if child.languages.is_empty() {
            parent.languages.clone()
        } else {
            child.languages.clone()
        },
    }
}

fn apply_defaults(defaults: &GroupDefaults, mut implementation: Implementation) -> Implementation {
    if implementation.architecture.is_none() {
        implementation.architecture = defaults.architecture.clone();
    }
    if implementation.stability == Stability::Unset {
        if let Some(stability) = defaults.stability {
            implementation.stability = stability;
        }
    }
    if implementation.languages.is_empty() {
        implementation.languages = defaults.languages.clone();
    }
    for (name, command) in &defaults.commands {
        implementation
            .commands
            .entry(name.clone())
            .or_insert_with(|| command.clone());
    }
    let mut dependencies = defaults.dependencies.clone();
    dependencies.extend(implementation.dependencies);
    implementation.dependencies = dependencies;

    let mut restrictions = defaults.restrictions.clone();
    restrictions.extend(implementation.restrictions);
    implementation.restrictions = restrictions;

    let mut bindings = defaults.bindings.clone();
    bindings.extend(implementation.bindings);
    implementation.bindings = bindings;

    implementation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Cpu, Os};

    fn sample_impl(id: &str, version: &str) -> Implementation {
        Implementation {
            id: id.to_owned(),
            version: ImplementationVersion::parse(version).unwrap(),
            released: None,
            architecture: None,
            languages: vec![],
            stability: Stability::Unset,
            manifest_digest: ManifestDigest::new(),
            retrieval_methods: vec![],
            commands: BTreeMap::new(),
            dependencies: vec![],
            restrictions: vec![],
            bindings: vec![],
            local_path: None,
            is_source: false,
        }
    }

    #[test]
    fn group_defaults_flow_down_to_implementations() {
        let group = Group {
            defaults: GroupDefaults {
                architecture: Some(Architecture::new(Os::Linux, Cpu::X86_64)),
                stability: Some(Stability::Testing),
                ..Default::default()
            },
            elements: vec![Element::Implementation(sample_impl("a", "1.0"))],
        };
        let feed = Feed {
            elements: vec![Element::Group(group)],
            ..Default::default()
        };
        let flat = feed.flatten_implementations();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].stability, Stability::Testing);
        assert_eq!(flat[0].architecture.as_ref().unwrap().cpu, Cpu::X86_64);
    }

    #[test]
    fn implementation_own_values_override_group_defaults() {
        let mut own = sample_impl("a", "1.0");
        own.stability = Stability::Stable;
        let group = Group {
            defaults: GroupDefaults {
                stability: Some(Stability::Testing),
                ..Default::default()
            },
            elements: vec![Element::Implementation(own)],
        };
        let feed = Feed {
            elements: vec![Element::Group(group)],
            ..Default::default()
        };
        assert_eq!(feed.flatten_implementations()[0].stability, Stability::Stable);
    }

    #[test]
    fn is_package_detects_package_prefix() {
        let mut implementation = sample_impl("package:curl", "1.0");
        assert!(implementation.is_package());
        implementation.id = "sha256new_abc".to_owned();
        assert!(!implementation.is_package());
    }

    #[test]
    fn retrieval_method_rank_prefers_smaller_downloads_then_shorter_recipes() {
        let small = RetrievalMethod::Archive(Archive {
            href: "a".into(),
            mime_type: None,
            size: 10,
            extract: None,
            destination: None,
            start_offset: 0,
        });
        let big = RetrievalMethod::Archive(Archive {
            href: "b".into(),
            mime_type: None,
            size: 1000,
            extract: None,
            destination: None,
            start_offset: 0,
        });
        let recipe = RetrievalMethod::Recipe(Recipe {
            steps: vec![RecipeStep::Remove { path: "x".into() }],
        });
        assert!(small.rank_key() < big.rank_key());
        assert!(big.rank_key() < recipe.rank_key());
    }
}
