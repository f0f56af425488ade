//! Solver (spec.md §4.7): picks one implementation per interface reached
//! from a root [`Requirements`], honoring version ranges, architecture,
//! language, stability policy, and native-package alternatives, and
//! returns a topologically sorted [`Selections`].
//!
//! The search is a plain recursive backtracking DFS over each interface's
//! ranked candidate list: try the best candidate, recurse into its
//! dependencies, and if a dependency can't be satisfied, undo the choice
//! and try the next-ranked candidate. A cycle (interface already chosen
//! earlier in the same branch) resolves immediately if the existing
//! choice satisfies the new restriction, otherwise the branch fails —
//! this engine does not re-open an already-committed interface to find a
//! version compatible with both branches, so a diamond dependency with
//! incompatible version requirements reports failure rather than
//! backjumping to loosen the earlier choice.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zeroinstall_native::NativePackageRegistry;
use zeroinstall_schema::arch::ArchSupport;
use zeroinstall_schema::feed::{Binding, RetrievalMethod as FeedRetrievalMethod};
use zeroinstall_schema::{
    Architecture, Command, Dependency, FeedPreferences, FeedUri, Implementation, Importance,
    InterfacePreferences, Requirements, Restriction, Selections, Stability, VersionRange,
};
use zeroinstall_schema::selections::ImplementationSelection;

use crate::errors::{EngineError, Result};
use crate::feed_cache::FeedCache;
use crate::handler::CancellationToken;

/// Everything the solver consults beyond `Requirements` itself. Built
/// fresh by the caller per solve; none of it is owned or cached here.
pub struct SolverContext<'a> {
    /// The root query.
    pub requirements: &'a Requirements,
    /// Where feeds are read from.
    pub feed_cache: &'a FeedCache,
    /// Native package candidates for `<package-implementation>` elements.
    pub native_registry: &'a NativePackageRegistry,
    /// The solver's stability policy default (spec.md §4.7 step 5).
    pub help_with_testing: bool,
    /// The host architecture candidates are matched against.
    pub host_architecture: &'a Architecture,
    /// Per-interface user overrides, looked up by interface URI.
    pub interface_preferences: &'a dyn Fn(&FeedUri) -> InterfacePreferences,
    /// Per-feed user overrides, looked up by feed URI.
    pub feed_preferences: &'a dyn Fn(&FeedUri) -> FeedPreferences,
    /// Checked once per candidate considered (spec.md §5: the solver is
    /// CPU-bound and only interruptible at candidate boundaries).
    pub token: &'a CancellationToken,
}

struct Candidate {
    from_feed: FeedUri,
    implementation: Implementation,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    not_preferred: bool,
    version: Reverse<zeroinstall_schema::ImplementationVersion>,
    arch: ArchSupport,
    lang_rank: usize,
    rollout_rank: u8,
    insertion_index: usize,
}

struct RankedCandidate {
    implementation: Implementation,
    from_feed: FeedUri,
    rank: RankKey,
}

struct ChosenImpl {
    from_feed: FeedUri,
    implementation: Implementation,
    command: Option<Command>,
}

struct SolveState {
    chosen: BTreeMap<FeedUri, ChosenImpl>,
    order: Vec<FeedUri>,
    /// Standalone `<restricts>` elements collected off every chosen
    /// implementation so far, keyed by the interface they narrow (spec.md
    /// §4.7: "every Restriction in any already-chosen implementation must
    /// be honored", independent of the dependency graph).
    restrictions: BTreeMap<FeedUri, Vec<Restriction>>,
}

/// The version constraint accumulated on `interface` from every
/// `<restricts>` element any already-chosen implementation carries.
fn global_version_restriction(state: &SolveState, interface: &FeedUri) -> VersionRange {
    let mut restriction = VersionRange::any();
    if let Some(list) = state.restrictions.get(interface) {
        for r in list {
            if let Some(versions) = &r.versions {
                restriction = restriction.intersect(versions);
            }
        }
    }
    restriction
}

/// Whether `implementation` satisfies a single `<restricts>` element's
/// version and OS constraints (distributions aren't checked here; they
/// only ever narrow `<package-implementation>` candidates, which are
/// expanded from the native registry's own query filter already).
fn restriction_allows(r: &Restriction, implementation: &Implementation) -> bool {
    if let Some(versions) = &r.versions {
        if !versions.matches(&implementation.version) {
            return false;
        }
    }
    if let Some(os) = &r.os {
        match &implementation.architecture {
            Some(arch) if &arch.os.to_string() == os => {}
            _ => return false,
        }
    }
    true
}

/// Reject a candidate whose own `commands` map doesn't define the command
/// name an `ExecutableInVar`/`ExecutableInPath` binding in `bindings`
/// wraps (spec.md: such a binding "rejects at solve time, not at deploy
/// time").
fn validate_bindings(bindings: &[Binding], commands: &BTreeMap<String, Command>) -> std::result::Result<(), String> {
    for binding in bindings {
        let command = match binding {
            Binding::ExecutableInVar { command, .. } | Binding::ExecutableInPath { command, .. } => command,
            _ => continue,
        };
        if !commands.contains_key(command) {
            return Err(format!(
                "binding references command {command:?}, which this implementation does not declare"
            ));
        }
    }
    Ok(())
}

/// Run the solve, returning a topologically sorted [`Selections`] or a
/// [`EngineError::SolverError`] naming the first interface that could not
/// be satisfied and why each of its candidates was rejected.
pub fn solve(ctx: &SolverContext) -> Result<Selections> {
    let requirements = ctx.requirements;
    let mut state = SolveState {
        chosen: BTreeMap::new(),
        order: Vec::new(),
        restrictions: BTreeMap::new(),
    };
    let restriction = requirements
        .extra_restrictions
        .get(&requirements.interface_uri)
        .cloned()
        .unwrap_or_else(VersionRange::any);

    solve_interface(
        &requirements.interface_uri,
        Some(&requirements.command),
        restriction,
        true,
        ctx,
        &mut state,
    )?;

    let implementations = state
        .order
        .iter()
        .map(|uri| {
            let chosen = &state.chosen[uri];
            ImplementationSelection {
                interface_uri: uri.clone(),
                from_feed: chosen.from_feed.clone(),
                id: chosen.implementation.id.clone(),
                version: chosen.implementation.version.clone(),
                architecture: chosen.implementation.architecture.clone(),
                stability: chosen.implementation.stability,
                manifest_digest: chosen.implementation.manifest_digest.clone(),
                command: chosen.command.clone(),
                dependencies: chosen.implementation.dependencies.clone(),
                restrictions: chosen.implementation.restrictions.clone(),
                bindings: chosen.implementation.bindings.clone(),
                local_path: chosen.implementation.local_path.clone(),
            }
        })
        .collect();

    Ok(Selections {
        interface_uri: Some(requirements.interface_uri.clone()),
        command: Some(requirements.command.clone()),
        implementations,
    })
}

fn solve_interface(
    interface: &FeedUri,
    command_name: Option<&str>,
    restriction: VersionRange,
    essential: bool,
    ctx: &SolverContext,
    state: &mut SolveState,
) -> Result<()> {
    ctx.token.check()?;

    let restriction = restriction.intersect(&global_version_restriction(state, interface));

    if let Some(existing) = state.chosen.get(interface) {
        if restriction.matches(&existing.implementation.version) {
            return Ok(());
        }
        return Err(EngineError::SolverError {
            interface: interface.to_string(),
            rejections: vec![format!(
                "already selected {} elsewhere in this solve, which does not satisfy a second, incompatible restriction",
                existing.implementation.version
            )],
        });
    }

    let interface_prefs = (ctx.interface_preferences)(interface);
    let policy = interface_prefs
        .stability_policy
        .unwrap_or_else(|| Stability::default_policy(ctx.help_with_testing));

    let candidates = collect_candidates(interface, ctx, &interface_prefs)?;
    let mut rejections = Vec::new();
    let mut ranked = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        match evaluate_candidate(&candidate, interface, &restriction, ctx, &interface_prefs, policy, index, state) {
            Ok(ranked_candidate) => ranked.push(ranked_candidate),
            Err(reason) => rejections.push(format!("{}: {reason}", candidate.implementation.id)),
        }
    }
    ranked.sort_by(|a, b| a.rank.cmp(&b.rank));

    for ranked_candidate in ranked {
        ctx.token.check()?;
        let implementation = ranked_candidate.implementation;
        let from_feed = ranked_candidate.from_feed;
        let command = command_name.and_then(|name| implementation.commands.get(name)).cloned();

        if let Err(reason) = validate_bindings(&implementation.bindings, &implementation.commands) {
            rejections.push(format!("{}: {reason}", implementation.id));
            continue;
        }

        state.chosen.insert(
            interface.clone(),
            ChosenImpl {
                from_feed: from_feed.clone(),
                implementation: implementation.clone(),
                command: command.clone(),
            },
        );

        let added_restrictions = implementation.restrictions.clone();
        for r in &added_restrictions {
            state.restrictions.entry(r.interface.clone()).or_default().push(r.clone());
        }

        let violated = added_restrictions.iter().find(|r| match state.chosen.get(&r.interface) {
            Some(already) => !restriction_allows(r, &already.implementation),
            None => false,
        });

        let attempt = match violated {
            Some(r) => Err(EngineError::SolverError {
                interface: r.interface.to_string(),
                rejections: vec![format!(
                    "a <restricts> element on {} conflicts with the already-chosen implementation of {}",
                    implementation.id, r.interface
                )],
            }),
            None => solve_dependencies(&implementation, &command, ctx, state, interface),
        };

        match attempt {
            Ok(()) => {
                state.order.push(interface.clone());
                return Ok(());
            }
            Err(err) => {
                for r in &added_restrictions {
                    if let Some(list) = state.restrictions.get_mut(&r.interface) {
                        if let Some(pos) = list.iter().rposition(|x| x == r) {
                            list.remove(pos);
                        }
                    }
                }
                state.chosen.remove(interface);
                rejections.push(format!("{}: dependency solve failed: {err}", implementation.id));
            }
        }
    }

    if essential {
        Err(EngineError::SolverError {
            interface: interface.to_string(),
            rejections,
        })
    } else {
        Ok(())
    }
}

fn solve_dependencies(
    implementation: &Implementation,
    command: &Option<Command>,
    ctx: &SolverContext,
    state: &mut SolveState,
    from: &FeedUri,
) -> Result<()> {
    let _ = from;
    for dep in &implementation.dependencies {
        solve_dependency(dep, ctx, state)?;
    }
    if let Some(command) = command {
        for dep in &command.dependencies {
            solve_dependency(dep, ctx, state)?;
        }
        if let Some(runner) = &command.runner {
            let restriction = runner.versions.clone().unwrap_or_else(VersionRange::any);
            let restriction = ctx.requirements.combined_restriction(&runner.interface, &restriction);
            solve_interface(&runner.interface, Some(&runner.command), restriction, true, ctx, state)?;
        }
    }
    Ok(())
}

fn solve_dependency(dep: &Dependency, ctx: &SolverContext, state: &mut SolveState) -> Result<()> {
    let restriction = dep.restriction.versions.clone().unwrap_or_else(VersionRange::any);
    let restriction = ctx.requirements.combined_restriction(&dep.restriction.interface, &restriction);
    solve_interface(
        &dep.restriction.interface,
        None,
        restriction,
        dep.importance == Importance::Essential,
        ctx,
        state,
    )
}

fn collect_candidates(interface: &FeedUri, ctx: &SolverContext, prefs: &InterfacePreferences) -> Result<Vec<Candidate>> {
    let mut feed_uris = vec![interface.clone()];
    if let Some(primary) = ctx.feed_cache.get_feed(interface) {
        for feed in &primary.feeds {
            if !feed_uris.contains(feed) {
                feed_uris.push(feed.clone());
            }
        }
    }
    for feed in &prefs.extra_feeds {
        if !feed_uris.contains(feed) {
            feed_uris.push(feed.clone());
        }
    }
    for cached in ctx.feed_cache.list_all()? {
        if feed_uris.contains(&cached) {
            continue;
        }
        if let Some(feed) = ctx.feed_cache.get_feed(&cached) {
            if feed.feed_for.contains(interface) {
                feed_uris.push(cached);
            }
        }
    }

    let mut out = Vec::new();
    for feed_uri in feed_uris {
        let Some(feed) = ctx.feed_cache.get_feed(&feed_uri) else {
            continue;
        };
        for implementation in feed.flatten_implementations() {
            if implementation.is_package() {
                for expanded in expand_package_candidates(&implementation, ctx)? {
                    out.push(Candidate {
                        from_feed: feed_uri.clone(),
                        implementation: expanded,
                    });
                }
            } else {
                out.push(Candidate {
                    from_feed: feed_uri.clone(),
                    implementation,
                });
            }
        }
    }
    Ok(out)
}

fn expand_package_candidates(pkg_impl: &Implementation, ctx: &SolverContext) -> Result<Vec<Implementation>> {
    let Some(FeedRetrievalMethod::External(ext)) = pkg_impl.retrieval_methods.first() else {
        return Ok(Vec::new());
    };
    let native = ctx.native_registry.query(&ext.package, &ext.distributions)?;
    Ok(native
        .into_iter()
        .map(|candidate| Implementation {
            id: candidate.id,
            version: candidate.version,
            released: None,
            architecture: Some(ctx.host_architecture.clone()),
            languages: Vec::new(),
            stability: Stability::Packaged,
            manifest_digest: zeroinstall_schema::ManifestDigest::new(),
            retrieval_methods: Vec::new(),
            commands: pkg_impl.commands.clone(),
            dependencies: pkg_impl.dependencies.clone(),
            restrictions: pkg_impl.restrictions.clone(),
            bindings: pkg_impl.bindings.clone(),
            local_path: None,
            is_source: false,
        })
        .collect())
}

fn arch_support(candidate: &Implementation, host: &Architecture) -> Option<ArchSupport> {
    match &candidate.architecture {
        None => Some(ArchSupport::Native),
        Some(arch) => arch.support_quality(host),
    }
}

fn language_rank(candidate_langs: &[String], preferred: &[String]) -> usize {
    if candidate_langs.is_empty() || preferred.is_empty() {
        return 0;
    }
    for (index, want) in preferred.iter().enumerate() {
        if candidate_langs.iter().any(|have| lang_matches(have, want)) {
            return index;
        }
    }
    preferred.len()
}

fn lang_matches(have: &str, want: &str) -> bool {
    let have = have.to_ascii_lowercase();
    let want = want.to_ascii_lowercase();
    have == want || have.starts_with(&format!("{want}-")) || want.starts_with(&format!("{have}-"))
}

/// Deterministic per-(interface, implementation) dice roll in `0..100`,
/// used to decide whether a staged-rollout candidate counts as available
/// yet (spec.md §4.7 step 5, "lower rollout-percentage dice roll"). The
/// schema carries no per-implementation rollout fraction to compare
/// against, so this only gates against the user's own configured
/// threshold rather than one declared by the feed.
fn rollout_dice(interface: &FeedUri, implementation_id: &str) -> u8 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    interface.as_str().hash(&mut hasher);
    implementation_id.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    rng.gen_range(0..100)
}

fn evaluate_candidate(
    candidate: &Candidate,
    interface: &FeedUri,
    restriction: &VersionRange,
    ctx: &SolverContext,
    prefs: &InterfacePreferences,
    policy: Stability,
    insertion_index: usize,
    state: &SolveState,
) -> std::result::Result<RankedCandidate, String> {
    let combined = ctx.requirements.combined_restriction(interface, restriction);
    if !combined.matches(&candidate.implementation.version) {
        return Err(format!(
            "version {} does not satisfy the required range",
            candidate.implementation.version
        ));
    }

    if let Some(list) = state.restrictions.get(interface) {
        for r in list {
            if let Some(os) = &r.os {
                let matches_os = matches!(&candidate.implementation.architecture, Some(arch) if &arch.os.to_string() == os);
                if !matches_os {
                    return Err(format!("does not match OS {os} required by a <restricts> element"));
                }
            }
        }
    }

    let Some(arch) = arch_support(&candidate.implementation, ctx.host_architecture) else {
        return Err("architecture is not supported on this host".into());
    };

    if ctx.requirements.source && !candidate.implementation.is_source {
        return Err("requirements ask for a source release; this is a binary".into());
    }
    if !ctx.requirements.source && candidate.implementation.is_source {
        return Err("this is a source release; requirements did not ask for one".into());
    }

    let feed_prefs = (ctx.feed_preferences)(&candidate.from_feed);
    let user_stability = feed_prefs
        .implementations
        .get(&candidate.implementation.id)
        .and_then(|p| p.user_stability);
    let effective_stability = user_stability.unwrap_or(candidate.implementation.stability);
    if matches!(effective_stability, Stability::Buggy | Stability::Insecure) {
        return Err(format!("excluded by stability ({effective_stability})"));
    }

    if !candidate.implementation.languages.is_empty() && !ctx.requirements.languages.is_empty() {
        let any_match = candidate
            .implementation
            .languages
            .iter()
            .any(|have| ctx.requirements.languages.iter().any(|want| lang_matches(have, want)));
        if !any_match {
            return Err("none of its languages are in the requested set".into());
        }
    }

    let lang_rank = language_rank(&candidate.implementation.languages, &ctx.requirements.languages);
    let dice = rollout_dice(interface, &candidate.implementation.id);
    let rollout_rank = match prefs.rollout_percentage {
        Some(threshold) if dice >= threshold => 1,
        _ => 0,
    };

    Ok(RankedCandidate {
        rank: RankKey {
            not_preferred: effective_stability < policy,
            version: Reverse(candidate.implementation.version.clone()),
            arch,
            lang_rank,
            rollout_rank,
            insertion_index,
        },
        implementation: candidate.implementation.clone(),
        from_feed: candidate.from_feed.clone(),
    })
}

/// True if `prefs.last_checked` is absent or older than `freshness`
/// relative to `now_unix` (spec.md §4.7 "Freshness"). The Fetcher calls
/// this before a solve to decide whether a cached feed needs refreshing
/// over the network first.
pub fn feed_is_stale(prefs: &FeedPreferences, freshness: Duration, now_unix: i64) -> bool {
    match prefs.last_checked {
        Some(checked) => now_unix.saturating_sub(checked) as u64 > freshness.as_secs(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use zeroinstall_schema::feed::Element;
    use zeroinstall_schema::{Feed, ImplementationVersion, ManifestDigest};

    fn uri(s: &str) -> FeedUri {
        FeedUri::new(s.to_owned())
    }

    fn impl_with_version(id: &str, version: &str) -> Implementation {
        Implementation {
            id: id.to_owned(),
            version: ImplementationVersion::parse(version).unwrap(),
            released: None,
            architecture: None,
            languages: vec![],
            stability: Stability::Stable,
            manifest_digest: ManifestDigest::new(),
            retrieval_methods: vec![],
            commands: Default::default(),
            dependencies: vec![],
            restrictions: vec![],
            bindings: vec![],
            local_path: None,
            is_source: false,
        }
    }

    fn write_feed(cache: &FeedCache, feed_uri: &FeedUri, feed: &Feed) {
        let xml = render_minimal_feed(feed);
        cache.add(feed_uri, xml.into_bytes()).unwrap();
    }

    fn render_minimal_feed(feed: &Feed) -> String {
        let mut impls = String::new();
        for element in &feed.elements {
            if let Element::Implementation(implementation) = element {
                impls.push_str(&format!(
                    "<implementation id=\"{}\" version=\"{}\" stability=\"{}\"/>\n",
                    implementation.id,
                    implementation.version,
                    implementation.stability
                ));
            }
        }
        format!("<interface><name>test</name>{impls}</interface>")
    }

    fn sample_ctx<'a>(
        requirements: &'a Requirements,
        feed_cache: &'a FeedCache,
        native_registry: &'a NativePackageRegistry,
        host: &'a Architecture,
        token: &'a CancellationToken,
    ) -> SolverContext<'a> {
        SolverContext {
            requirements,
            feed_cache,
            native_registry,
            help_with_testing: false,
            host_architecture: host,
            interface_preferences: &|_| InterfacePreferences::default(),
            feed_preferences: &|_| FeedPreferences::default(),
            token,
        }
    }

    #[test]
    fn picks_highest_version_within_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let iface = uri("https://example.com/app.xml");

        let feed = Feed {
            uri: iface.clone(),
            elements: vec![
                Element::Implementation(impl_with_version("a", "0.9")),
                Element::Implementation(impl_with_version("b", "1.0")),
                Element::Implementation(impl_with_version("c", "1.1")),
                Element::Implementation(impl_with_version("d", "2.0")),
                Element::Implementation(impl_with_version("e", "2.1")),
            ],
            ..Default::default()
        };
        write_feed(&cache, &iface, &feed);

        let host = Architecture::new(zeroinstall_schema::Os::Linux, zeroinstall_schema::Cpu::X86_64);
        let native_registry = NativePackageRegistry::new();
        let token = CancellationToken::new();

        let mut requirements = Requirements::new(iface.clone(), host.clone());
        requirements
            .extra_restrictions
            .insert(iface.clone(), VersionRange::parse_range_expr("..!2.0").unwrap());

        let ctx = sample_ctx(&requirements, &cache, &native_registry, &host, &token);
        let selections = solve(&ctx).unwrap();
        let selected = selections.get(&iface).unwrap();
        assert_eq!(selected.version, ImplementationVersion::parse("1.1").unwrap());
    }

    #[test]
    fn extra_restriction_narrows_to_lower_version() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let iface = uri("https://example.com/app2.xml");

        let feed = Feed {
            uri: iface.clone(),
            elements: vec![
                Element::Implementation(impl_with_version("a", "1.0")),
                Element::Implementation(impl_with_version("b", "1.1")),
            ],
            ..Default::default()
        };
        write_feed(&cache, &iface, &feed);

        let host = Architecture::new(zeroinstall_schema::Os::Linux, zeroinstall_schema::Cpu::X86_64);
        let native_registry = NativePackageRegistry::new();
        let token = CancellationToken::new();

        let mut requirements = Requirements::new(iface.clone(), host.clone());
        requirements
            .extra_restrictions
            .insert(iface.clone(), VersionRange::parse_range_expr("..!1.1").unwrap());

        let ctx = sample_ctx(&requirements, &cache, &native_registry, &host, &token);
        let selections = solve(&ctx).unwrap();
        let selected = selections.get(&iface).unwrap();
        assert_eq!(selected.version, ImplementationVersion::parse("1.0").unwrap());
    }

    #[test]
    fn no_matching_candidate_is_a_solver_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let iface = uri("https://example.com/app3.xml");

        let feed = Feed {
            uri: iface.clone(),
            elements: vec![Element::Implementation(impl_with_version("a", "1.0"))],
            ..Default::default()
        };
        write_feed(&cache, &iface, &feed);

        let host = Architecture::new(zeroinstall_schema::Os::Linux, zeroinstall_schema::Cpu::X86_64);
        let native_registry = NativePackageRegistry::new();
        let token = CancellationToken::new();

        let mut requirements = Requirements::new(iface.clone(), host.clone());
        requirements
            .extra_restrictions
            .insert(iface.clone(), VersionRange::parse_range_expr("2.0..").unwrap());

        let ctx = sample_ctx(&requirements, &cache, &native_registry, &host, &token);
        let err = solve(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::SolverError { .. }));
    }

    #[test]
    fn stale_feed_detected_past_freshness_window() {
        let prefs = FeedPreferences {
            last_checked: Some(1000),
            implementations: Default::default(),
        };
        assert!(feed_is_stale(&prefs, Duration::from_secs(100), 2000));
        assert!(!feed_is_stale(&prefs, Duration::from_secs(2000), 2000));
    }

    #[test]
    fn never_checked_feed_is_always_stale() {
        let prefs = FeedPreferences::default();
        assert!(feed_is_stale(&prefs, Duration::from_secs(u64::MAX / 2), 0));
    }
}
