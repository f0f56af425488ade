//! Zero Install version numbers and version ranges (spec.md §3).
//!
//! A version is a dot-separated sequence of numeric components optionally
//! interleaved with modifiers (`pre`, `rc`, `post`, or a bare `-`), e.g.
//! `1.2-rc1`, `2.0-post1`, `1.0-1` (the trailing `-1` is itself a component
//! group, used for distro revision numbers). Ordering compares component
//! groups left to right; a missing group sorts before any modifier.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One `-`-separated piece of a version: a run of numeric components plus
/// the modifier word that introduced it (`""` for the first piece).
#[derive(Clone, Debug, PartialEq, Eq)]
struct VersionPart {
    modifier: Modifier,
    components: Vec<u64>,
}

/// Relative ordering of a modifier word, matching 0install's documented
/// order: `pre` < (nothing) < `rc` < (nothing) < `post`, with a bare
/// dash ranking below `pre`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Modifier {
    Dash,
    Pre,
    Normal,
    Rc,
    Post,
}

impl Modifier {
    fn parse(word: &str) -> Option<Modifier> {
        match word {
            "" => Some(Modifier::Normal),
            "pre" => Some(Modifier::Pre),
            "rc" => Some(Modifier::Rc),
            "post" => Some(Modifier::Post),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Modifier::Dash => "",
            Modifier::Pre => "pre",
            Modifier::Normal => "",
            Modifier::Rc => "rc",
            Modifier::Post => "post",
        }
    }
}

/// A Zero Install implementation version, e.g. `1.2.3-pre1`.
///
/// Unlike a strict SemVer version, this type accepts 0install's richer
/// grammar: any number of dot-separated components per part, and part
/// separators can be a modifier word (`pre`/`rc`/`post`) or a bare `-`
/// that starts a new all-numeric part (used for distribution revisions,
/// e.g. `1.0-1`).
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImplementationVersion {
    parts: Vec<VersionPart>,
    raw: String,
}

impl ImplementationVersion {
    /// Parse a version string, or `None` if it isn't valid 0install version
    /// syntax.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        let mut rest = s;
        let mut first = true;
        loop {
            let (word, after_word) = split_modifier(rest);
            let modifier = if first && word.is_empty() {
                Modifier::Normal
            } else if word.is_empty() {
                Modifier::Dash
            } else {
                Modifier::parse(word)?
            };
            let (digits, after_digits) = split_digits(after_word);
            let components = digits
                .split('.')
                .map(|c| c.parse::<u64>().ok())
                .collect::<Option<Vec<_>>>()?;
            if digits.is_empty() && modifier != Modifier::Normal {
                // a trailing bare modifier with no digits, e.g. "1.0-pre"
            } else if digits.is_empty() {
                return None;
            }
            parts.push(VersionPart {
                modifier,
                components,
            });
            first = false;
            if after_digits.is_empty() {
                break;
            }
            rest = after_digits;
        }
        Some(ImplementationVersion {
            parts,
            raw: s.to_owned(),
        })
    }

    /// The original string form, preserved verbatim for round-tripping
    /// through feeds and selections documents.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_modifier(s: &str) -> (&str, &str) {
    let bytes = s.as_bytes();
    if bytes.first() == Some(&b'-') {
        let rest = &s[1..];
        let word_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        (&rest[..word_end], &rest[word_end..])
    } else {
        ("", s)
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find('-').unwrap_or(s.len());
    (&s[..end], &s[end..])
}

impl PartialEq for ImplementationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ImplementationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImplementationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in 0..self.parts.len().max(other.parts.len()) {
            let a = self.parts.get(i);
            let b = other.parts.get(i);
            let ord = match (a, b) {
                (Some(a), Some(b)) => a
                    .modifier
                    .cmp(&b.modifier)
                    .then_with(|| compare_components(&a.components, &b.components)),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn compare_components(a: &[u64], b: &[u64]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let ord = a.get(i).copied().unwrap_or(0).cmp(&b.get(i).copied().unwrap_or(0));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl fmt::Display for ImplementationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ImplementationVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImplementationVersion::parse(s).ok_or_else(|| InvalidVersion(s.to_owned()))
    }
}

impl TryFrom<String> for ImplementationVersion {
    type Error = InvalidVersion;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ImplementationVersion> for String {
    fn from(v: ImplementationVersion) -> String {
        v.raw
    }
}

/// A version string failed to parse as 0install version syntax.
#[derive(Debug, thiserror::Error)]
#[error("invalid version string: {0:?}")]
pub struct InvalidVersion(pub String);

/// One `|`-separated piece of a version range expression (spec.md §3):
/// either a half-open interval, a single pinned version, or a `!version`
/// exclusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum RangePart {
    /// `start..!end`, `start..`, or `..!end`; either bound may be absent.
    Interval {
        not_before: Option<ImplementationVersion>,
        before: Option<ImplementationVersion>,
    },
    /// A bare `version="X"` pin.
    Exact(ImplementationVersion),
    /// `!version`: every version except this one.
    Exclude(ImplementationVersion),
}

impl RangePart {
    fn matches(&self, version: &ImplementationVersion) -> bool {
        match self {
            RangePart::Interval { not_before, before } => {
                if let Some(lo) = not_before {
                    if version < lo {
                        return false;
                    }
                }
                if let Some(hi) = before {
                    if version >= hi {
                        return false;
                    }
                }
                true
            }
            RangePart::Exact(v) => version == v,
            RangePart::Exclude(v) => version != v,
        }
    }

    /// Intersection of two positive parts (`Interval`/`Exact`), or `None`
    /// if the two can never agree on any version. `Exclude` parts aren't
    /// combined this way; they're carried separately and applied as a
    /// blanket veto (see [`VersionRange::intersect`]).
    fn intersect_positive(&self, other: &RangePart) -> Option<RangePart> {
        match (self, other) {
            (RangePart::Exact(a), RangePart::Exact(b)) => {
                if a == b {
                    Some(RangePart::Exact(a.clone()))
                } else {
                    None
                }
            }
            (RangePart::Exact(v), RangePart::Interval { not_before, before })
            | (RangePart::Interval { not_before, before }, RangePart::Exact(v)) => {
                let above_lo = match not_before {
                    Some(lo) => v >= lo,
                    None => true,
                };
                let below_hi = match before {
                    Some(hi) => v < hi,
                    None => true,
                };
                if above_lo && below_hi {
                    Some(RangePart::Exact(v.clone()))
                } else {
                    None
                }
            }
            (
                RangePart::Interval { not_before: a_lo, before: a_hi },
                RangePart::Interval { not_before: b_lo, before: b_hi },
            ) => {
                let not_before = match (a_lo, b_lo) {
                    (Some(a), Some(b)) => Some(a.clone().max(b.clone())),
                    (Some(a), None) => Some(a.clone()),
                    (None, Some(b)) => Some(b.clone()),
                    (None, None) => None,
                };
                let before = match (a_hi, b_hi) {
                    (Some(a), Some(b)) => Some(a.clone().min(b.clone())),
                    (Some(a), None) => Some(a.clone()),
                    (None, Some(b)) => Some(b.clone()),
                    (None, None) => None,
                };
                if let (Some(lo), Some(hi)) = (&not_before, &before) {
                    if lo >= hi {
                        return None;
                    }
                }
                Some(RangePart::Interval { not_before, before })
            }
            _ => None,
        }
    }

    fn exclude(&self) -> Option<&ImplementationVersion> {
        match self {
            RangePart::Exclude(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RangePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangePart::Exact(v) => write!(f, "{v}"),
            RangePart::Exclude(v) => write!(f, "!{v}"),
            RangePart::Interval { not_before, before } => {
                if let Some(lo) = not_before {
                    write!(f, "{lo}")?;
                }
                f.write_str("..")?;
                if let Some(hi) = before {
                    write!(f, "!{hi}")?;
                }
                Ok(())
            }
        }
    }
}

/// A set of version constraints, as found in a feed's `version` attribute
/// or a `<requires>` element: a `|`-separated union of intervals, exact
/// pins, and `!version` exclusions (spec.md §3). A version matches the
/// range if it satisfies at least one non-exclude part (or there are
/// none) and none of the exclude parts name it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    parts: Vec<RangePart>,
}

impl VersionRange {
    /// The unconstrained range: matches every version.
    pub fn any() -> Self {
        VersionRange { parts: Vec::new() }
    }

    /// True if `version` satisfies this range.
    pub fn matches(&self, version: &ImplementationVersion) -> bool {
        let mut positives = self.parts.iter().filter(|p| p.exclude().is_none()).peekable();
        let positive_ok = if positives.peek().is_none() {
            true
        } else {
            positives.clone().any(|p| p.matches(version))
        };
        if !positive_ok {
            return false;
        }
        !self.parts.iter().filter_map(RangePart::exclude).any(|v| v == version)
    }

    /// Intersect two ranges (logical AND of [`VersionRange::matches`]),
    /// reduced to a canonical union of parts: every pairwise combination
    /// of the two sides' positive parts that can still match something,
    /// plus the union of both sides' exclusions. Used when a dependency
    /// is constrained by more than one `<requires>` element across a
    /// solve.
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let self_positives: Vec<&RangePart> = self.parts.iter().filter(|p| p.exclude().is_none()).collect();
        let other_positives: Vec<&RangePart> = other.parts.iter().filter(|p| p.exclude().is_none()).collect();

        let mut parts = Vec::new();
        if self_positives.is_empty() && other_positives.is_empty() {
            // neither side restricts which versions match; no positive part needed
        } else if self_positives.is_empty() {
            parts.extend(other_positives.iter().map(|p| (*p).clone()));
        } else if other_positives.is_empty() {
            parts.extend(self_positives.iter().map(|p| (*p).clone()));
        } else {
            for a in &self_positives {
                for b in &other_positives {
                    if let Some(combined) = a.intersect_positive(b) {
                        if !parts.contains(&combined) {
                            parts.push(combined);
                        }
                    }
                }
            }
        }

        for exclude in self.parts.iter().chain(&other.parts).filter_map(RangePart::exclude) {
            let part = RangePart::Exclude(exclude.clone());
            if !parts.contains(&part) {
                parts.push(part);
            }
        }

        VersionRange { parts }
    }

    /// Parse a `|`-separated version range expression (spec.md §3): each
    /// piece is `start..!end`, `start..`, `..!end`, a bare pinned
    /// version, or `!version` to exclude one version from an otherwise
    /// unconstrained range.
    pub fn parse_range_expr(s: &str) -> Option<VersionRange> {
        let parts = s
            .split('|')
            .map(RangePart::parse)
            .collect::<Option<Vec<_>>>()?;
        Some(VersionRange { parts })
    }

    #[cfg(test)]
    fn single_interval(&self) -> (Option<ImplementationVersion>, Option<ImplementationVersion>) {
        match self.parts.as_slice() {
            [RangePart::Interval { not_before, before }] => (not_before.clone(), before.clone()),
            [] => (None, None),
            _ => panic!("not a single interval: {self:?}"),
        }
    }
}

impl fmt::Display for VersionRange {
    /// Render as the `|`-separated expression grammar [`VersionRange::parse_range_expr`]
    /// reads back, empty string for the unconstrained range.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl RangePart {
    fn parse(s: &str) -> Option<RangePart> {
        if let Some(excluded) = s.strip_prefix('!') {
            return Some(RangePart::Exclude(ImplementationVersion::parse(excluded)?));
        }
        if let Some((lo, hi)) = s.split_once("..!") {
            let not_before = if lo.is_empty() {
                None
            } else {
                Some(ImplementationVersion::parse(lo)?)
            };
            let before = if hi.is_empty() {
                None
            } else {
                Some(ImplementationVersion::parse(hi)?)
            };
            Some(RangePart::Interval { not_before, before })
        } else if let Some(lo) = s.strip_suffix("..") {
            Some(RangePart::Interval {
                not_before: Some(ImplementationVersion::parse(lo)?),
                before: None,
            })
        } else {
            Some(RangePart::Exact(ImplementationVersion::parse(s)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_spec_examples() {
        let versions = [
            "0.9", "1.0-pre1", "1.0-pre2", "1.0-rc1", "1.0", "1.0-0", "1.0-1", "1.0-post",
            "1.1",
        ];
        let parsed: Vec<_> = versions
            .iter()
            .map(|v| ImplementationVersion::parse(v).unwrap())
            .collect();
        for w in parsed.windows(2) {
            assert!(
                w[0] < w[1],
                "expected {} < {}",
                w[0].as_str(),
                w[1].as_str()
            );
        }
    }

    #[test]
    fn round_trip_display() {
        let v = ImplementationVersion::parse("1.2.3-pre4").unwrap();
        assert_eq!(v.to_string(), "1.2.3-pre4");
    }

    #[test]
    fn range_expr_round_trips_through_display() {
        for expr in ["1.0..!2.0", "!1.5", "2.0", "1.0..", "..!2.0", "1.0..!2.0|3.0.."] {
            let range = VersionRange::parse_range_expr(expr).unwrap();
            assert_eq!(range.to_string(), expr);
        }
        assert_eq!(VersionRange::any().to_string(), "");
    }

    #[test]
    fn range_matches() {
        let range = VersionRange::parse_range_expr("1.0..!2.0").unwrap();
        assert!(range.matches(&ImplementationVersion::parse("1.5").unwrap()));
        assert!(!range.matches(&ImplementationVersion::parse("2.0").unwrap()));
        assert!(!range.matches(&ImplementationVersion::parse("0.9").unwrap()));
    }

    #[test]
    fn range_intersect_tightens() {
        let a = VersionRange::parse_range_expr("1.0..!3.0").unwrap();
        let b = VersionRange::parse_range_expr("2.0..!4.0").unwrap();
        let both = a.intersect(&b);
        let (not_before, before) = both.single_interval();
        assert_eq!(not_before, ImplementationVersion::parse("2.0"));
        assert_eq!(before, ImplementationVersion::parse("3.0"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ImplementationVersion::parse("").is_none());
        assert!(ImplementationVersion::parse("abc").is_none());
        assert!(ImplementationVersion::parse("1.0-bogus1").is_none());
    }

    #[test]
    fn union_matches_either_part() {
        let range = VersionRange::parse_range_expr("1.0..!2.0|3.0..!4.0").unwrap();
        assert!(range.matches(&ImplementationVersion::parse("1.5").unwrap()));
        assert!(range.matches(&ImplementationVersion::parse("3.5").unwrap()));
        assert!(!range.matches(&ImplementationVersion::parse("2.5").unwrap()));
    }

    #[test]
    fn exclude_vetoes_an_otherwise_unconstrained_range() {
        let range = VersionRange::parse_range_expr("!1.5").unwrap();
        assert!(range.matches(&ImplementationVersion::parse("1.0").unwrap()));
        assert!(!range.matches(&ImplementationVersion::parse("1.5").unwrap()));
    }

    #[test]
    fn exclude_vetoes_within_a_matching_interval() {
        let range = VersionRange::parse_range_expr("1.0..!3.0|!2.0").unwrap();
        assert!(range.matches(&ImplementationVersion::parse("1.5").unwrap()));
        assert!(!range.matches(&ImplementationVersion::parse("2.0").unwrap()));
    }

    #[test]
    fn intersect_combines_exclusions_from_both_sides() {
        let a = VersionRange::parse_range_expr("!1.0").unwrap();
        let b = VersionRange::parse_range_expr("!2.0").unwrap();
        let both = a.intersect(&b);
        assert!(!both.matches(&ImplementationVersion::parse("1.0").unwrap()));
        assert!(!both.matches(&ImplementationVersion::parse("2.0").unwrap()));
        assert!(both.matches(&ImplementationVersion::parse("3.0").unwrap()));
    }
}
