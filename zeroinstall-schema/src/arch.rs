//! Host and implementation architecture matching (spec.md §3, §4.7).
//!
//! An [`Architecture`] is an `OS-CPU` pair, either half of which may be the
//! wildcard `*`. [`ArchSupport`] ranks how well a candidate implementation's
//! architecture fits the running host, the same idea as `cargo-dist`'s
//! `SupportQuality` (`cargo-dist/src/platform.rs`) generalized from "which
//! prebuilt archive" to "which OS/CPU pair".

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

declare_stringish_enum! {
    /// Operating system component of an [`Architecture`].
    #[derive(Serialize, Deserialize)]
    #[serde(into = "String", from = "String")]
    pub enum Os {
        Other(String),
        /// Matches every OS.
        Any = "*",
        Cygwin = "Cygwin",
        Darwin = "Darwin",
        FreeBSD = "FreeBSD",
        Linux = "Linux",
        MacOSX = "MacOSX",
        Solaris = "Solaris",
        Windows = "Windows",
    }
}

declare_stringish_enum! {
    /// CPU component of an [`Architecture`].
    #[derive(Serialize, Deserialize)]
    #[serde(into = "String", from = "String")]
    pub enum Cpu {
        Other(String),
        /// Matches every CPU.
        Any = "*",
        Src = "src",
        I386 = "i386",
        I486 = "i486",
        I586 = "i586",
        I686 = "i686",
        Ppc = "ppc",
        Ppc64 = "ppc64",
        X86_64 = "x86_64",
        Armv6l = "armv6l",
        Armv7l = "armv7l",
        Arm64 = "arm64",
    }
}

impl From<String> for Os {
    fn from(s: String) -> Self {
        Os::from_str(&s)
    }
}
impl From<Os> for String {
    fn from(os: Os) -> String {
        os.to_string()
    }
}
impl From<String> for Cpu {
    fn from(s: String) -> Self {
        Cpu::from_str(&s)
    }
}
impl From<Cpu> for String {
    fn from(cpu: Cpu) -> String {
        cpu.to_string()
    }
}

/// 32-bit x86 CPUs that can run on a 64-bit host of the same family.
const X86_32_FAMILY: &[Cpu] = &[Cpu::I386, Cpu::I486, Cpu::I586, Cpu::I686];

/// `(OS, CPU)` pair, parsed from a feed's `arch="OS-CPU"` attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    /// `None` means the feed specified no `arch` attribute at all (matches
    /// every OS, distinct from an explicit `*`, though both behave
    /// identically for matching purposes).
    pub os: Os,
    /// See [`Architecture::os`].
    pub cpu: Cpu,
}

impl Architecture {
    /// The host's own architecture, as reported by `std::env::consts`,
    /// wired up in `zeroinstall-native`.
    pub fn new(os: Os, cpu: Cpu) -> Self {
        Architecture { os, cpu }
    }

    /// Parse the `arch="OS-CPU"` attribute form.
    pub fn parse(s: &str) -> Option<Architecture> {
        let (os, cpu) = s.split_once('-')?;
        Some(Architecture {
            os: Os::from_str(os),
            cpu: Cpu::from_str(cpu),
        })
    }

    /// True if a binary built for `self` can run on `host`, possibly via
    /// emulation or a compatible ABI. Use [`Architecture::support_quality`]
    /// to rank among several matching candidates.
    pub fn runs_on(&self, host: &Architecture) -> bool {
        self.support_quality(host).is_some()
    }

    /// How well this architecture runs on `host`, lowest being best, or
    /// `None` if it cannot run at all. Mirrors `cargo-dist`'s
    /// `SupportQuality` ordering: an exact match wins, a same-family
    /// narrower binary is next best, true emulation is a last resort.
    pub fn support_quality(&self, host: &Architecture) -> Option<ArchSupport> {
        let os_ok = self.os == Os::Any || host.os == Os::Any || self.os == host.os;
        if !os_ok {
            return None;
        }
        if self.cpu == Cpu::Any || host.cpu == Cpu::Any || self.cpu == host.cpu {
            return Some(ArchSupport::Native);
        }
        // A 32-bit x86 build runs fine on any 64-bit x86 host.
        if host.cpu == Cpu::X86_64 && X86_32_FAMILY.contains(&self.cpu) {
            return Some(ArchSupport::ImperfectNative);
        }
        // Source implementations are always a fallback candidate: building
        // from source runs "natively" once built, but ranks last among
        // prebuilt options.
        if self.cpu == Cpu::Src {
            return Some(ArchSupport::Source);
        }
        None
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.cpu)
    }
}

/// How closely a candidate [`Architecture`] fits the host, best first.
/// Used by the solver's rank step (spec.md §4.7, "better architecture
/// match").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchSupport {
    /// Exact OS/CPU match, or a wildcard standing in for one.
    Native,
    /// Runs via a documented compatible ABI (32-bit binary on a 64-bit
    /// host of the same CPU family).
    ImperfectNative,
    /// Must be built from source before it can run at all.
    Source,
}

/// Implementation quality/maturity (spec.md §3), a total order from worst
/// to best. `Unset` sorts highest because an implementation with no
/// explicit stability is treated as implicitly trustworthy — it simply
/// hasn't been rated — matching the documented candidate-ranking rule
/// "preferred (stability >= policy)".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    /// Known broken in a way that compromises the user.
    Insecure,
    /// Known broken.
    Buggy,
    /// Under active development, expect bugs.
    Developer,
    /// Believed to work but not yet field-proven.
    Testing,
    /// Field-proven.
    Stable,
    /// Provided by the host's native package manager rather than a feed.
    Packaged,
    /// Explicitly promoted above `Stable` by the feed author or user.
    Preferred,
    /// No explicit rating.
    #[serde(other)]
    Unset,
}

impl Stability {
    /// The solver's default required policy (spec.md §4.7): `Stable`
    /// unless `HelpWithTesting` lowers it to `Testing`.
    pub fn default_policy(help_with_testing: bool) -> Stability {
        if help_with_testing {
            Stability::Testing
        } else {
            Stability::Stable
        }
    }

    /// Parse a `stability=` attribute value, the inverse of [`Stability`]'s
    /// `Display`. `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Stability> {
        match s {
            "insecure" => Some(Stability::Insecure),
            "buggy" => Some(Stability::Buggy),
            "developer" => Some(Stability::Developer),
            "testing" => Some(Stability::Testing),
            "stable" => Some(Stability::Stable),
            "packaged" => Some(Stability::Packaged),
            "preferred" => Some(Stability::Preferred),
            "unset" => Some(Stability::Unset),
            _ => None,
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Insecure => "insecure",
            Stability::Buggy => "buggy",
            Stability::Developer => "developer",
            Stability::Testing => "testing",
            Stability::Stable => "stable",
            Stability::Packaged => "packaged",
            Stability::Preferred => "preferred",
            Stability::Unset => "unset",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcards() {
        let a = Architecture::parse("*-*").unwrap();
        assert_eq!(a.os, Os::Any);
        assert_eq!(a.cpu, Cpu::Any);

        let b = Architecture::parse("Linux-x86_64").unwrap();
        assert_eq!(b.os, Os::Linux);
        assert_eq!(b.cpu, Cpu::X86_64);
    }

    #[test]
    fn exact_match_is_native() {
        let host = Architecture::parse("Linux-x86_64").unwrap();
        let candidate = Architecture::parse("Linux-x86_64").unwrap();
        assert_eq!(candidate.support_quality(&host), Some(ArchSupport::Native));
    }

    #[test]
    fn x86_32_runs_imperfect_on_x64_host() {
        let host = Architecture::parse("Linux-x86_64").unwrap();
        let candidate = Architecture::parse("Linux-i686").unwrap();
        assert_eq!(
            candidate.support_quality(&host),
            Some(ArchSupport::ImperfectNative)
        );
    }

    #[test]
    fn mismatched_os_never_runs() {
        let host = Architecture::parse("Linux-x86_64").unwrap();
        let candidate = Architecture::parse("Windows-x86_64").unwrap();
        assert_eq!(candidate.support_quality(&host), None);
    }

    #[test]
    fn native_ranks_better_than_imperfect() {
        assert!(ArchSupport::Native < ArchSupport::ImperfectNative);
        assert!(ArchSupport::ImperfectNative < ArchSupport::Source);
    }

    #[test]
    fn stability_total_order_matches_spec() {
        assert!(Stability::Insecure < Stability::Buggy);
        assert!(Stability::Buggy < Stability::Developer);
        assert!(Stability::Developer < Stability::Testing);
        assert!(Stability::Testing < Stability::Stable);
        assert!(Stability::Stable < Stability::Packaged);
        assert!(Stability::Packaged < Stability::Preferred);
        assert!(Stability::Preferred < Stability::Unset);
    }

    #[test]
    fn default_policy_follows_help_with_testing() {
        assert_eq!(Stability::default_policy(false), Stability::Stable);
        assert_eq!(Stability::default_policy(true), Stability::Testing);
    }
}
