//! The trust relation between OpenPGP keys and the domains they're
//! trusted to sign feeds for (spec.md §3, §4.3).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

declare_strongly_typed_string! {
    /// An OpenPGP key fingerprint, as a lowercase hex string.
    pub struct Fingerprint => &FingerprintRef;
}

declare_strongly_typed_string! {
    /// A DNS domain name a feed was served from (or `Domain::local()` for
    /// offline/local feeds, which are never subject to trust checks).
    pub struct Domain => &DomainRef;
}

/// `fingerprint -> {domains it is trusted to sign for}` (spec.md §4.3).
/// Trust is a function of fingerprint *and* domain, never of the key
/// alone: a key compromised for one project doesn't implicate its use
/// elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDb {
    keys: BTreeMap<Fingerprint, BTreeSet<Domain>>,
}

impl TrustDb {
    /// An empty trust database.
    pub fn new() -> Self {
        TrustDb::default()
    }

    /// Record that `fingerprint` is trusted to sign feeds served from
    /// `domain`.
    pub fn trust(&mut self, fingerprint: Fingerprint, domain: Domain) {
        self.keys.entry(fingerprint).or_default().insert(domain);
    }

    /// Withdraw trust. Returns `true` if the pair was present.
    pub fn untrust(&mut self, fingerprint: &Fingerprint, domain: &Domain) -> bool {
        let Some(domains) = self.keys.get_mut(fingerprint) else {
            return false;
        };
        let removed = domains.remove(domain);
        if domains.is_empty() {
            self.keys.remove(fingerprint);
        }
        removed
    }

    /// True if `fingerprint` is trusted for `domain`. Exact match only:
    /// trusting `example.com` never implies trust for `sub.example.com`
    /// (spec.md open question — see DESIGN.md).
    pub fn is_trusted(&self, fingerprint: &Fingerprint, domain: &Domain) -> bool {
        self.keys
            .get(fingerprint)
            .is_some_and(|domains| domains.contains(domain))
    }

    /// All domains `fingerprint` is trusted for.
    pub fn domains_for(&self, fingerprint: &Fingerprint) -> BTreeSet<Domain> {
        self.keys.get(fingerprint).cloned().unwrap_or_default()
    }

    /// All fingerprints trusted for `domain`, used when deciding whether
    /// any signature on a newly fetched feed is already accepted.
    pub fn fingerprints_for(&self, domain: &Domain) -> BTreeSet<Fingerprint> {
        self.keys
            .iter()
            .filter(|(_, domains)| domains.contains(domain))
            .map(|(fp, _)| fp.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_is_scoped_to_exact_domain() {
        let mut db = TrustDb::new();
        let fp = Fingerprint::new("ABCD1234".into());
        db.trust(fp.clone(), Domain::new("example.com".into()));

        assert!(db.is_trusted(&fp, &Domain::new("example.com".into())));
        assert!(!db.is_trusted(&fp, &Domain::new("sub.example.com".into())));
        assert!(!db.is_trusted(&fp, &Domain::new("other.com".into())));
    }

    #[test]
    fn untrust_removes_empty_key_entry() {
        let mut db = TrustDb::new();
        let fp = Fingerprint::new("ABCD1234".into());
        let domain = Domain::new("example.com".into());
        db.trust(fp.clone(), domain.clone());
        assert!(db.untrust(&fp, &domain));
        assert!(db.domains_for(&fp).is_empty());
        assert!(!db.untrust(&fp, &domain));
    }

    #[test]
    fn fingerprints_for_domain() {
        let mut db = TrustDb::new();
        let fp1 = Fingerprint::new("AAA".into());
        let fp2 = Fingerprint::new("BBB".into());
        let domain = Domain::new("example.com".into());
        db.trust(fp1.clone(), domain.clone());
        db.trust(fp2.clone(), domain.clone());
        db.trust(fp2.clone(), Domain::new("other.com".into()));

        let found = db.fingerprints_for(&domain);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&fp1));
        assert!(found.contains(&fp2));
    }
}
