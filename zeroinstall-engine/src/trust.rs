//! Trust Subsystem (spec.md §4.3): splits a feed's signature trailer,
//! verifies it against known keys, and decides whether the result is
//! acceptable for the feed's domain.

use std::time::UNIX_EPOCH;

use data_encoding::BASE64;
use sequoia_openpgp::cert::Cert;
use sequoia_openpgp::parse::stream::{
    DetachedVerifierBuilder, GoodChecksum, MessageLayer, MessageStructure, VerificationError,
    VerificationHelper,
};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::KeyHandle;

use zeroinstall_schema::trust::{Domain, Fingerprint, TrustDb};
use zeroinstall_schema::FeedUri;

use crate::errors::{EngineError, Result};
use crate::handler::Handler;

const MARKER_START: &str = "<!-- Base64 Signature\n";
const MARKER_END: &str = "\n-->\n";

/// The outcome of checking one signature in a trailer.
#[derive(Clone, Debug)]
pub enum SignatureVerdict {
    /// The signature checked out cryptographically.
    Valid {
        /// The signing key's fingerprint, lowercase hex.
        fingerprint: Fingerprint,
        /// When the signature was made, seconds since the Unix epoch.
        timestamp: i64,
    },
    /// The signature is present but does not verify against the key it
    /// claims to be from.
    Bad,
    /// The signing key wasn't available to check against.
    Missing {
        /// The key ID the signature names, as it appeared in the packet.
        keyid: String,
    },
}

/// Split a feed document into its payload and raw signature bytes
/// (spec.md §4.3 "Signature block"). Returns `Ok(None)` if the document
/// carries no trailer at all — a plain, unsigned feed.
pub fn split_signature_block(bytes: &[u8]) -> Result<Option<(&[u8], Vec<u8>)>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| EngineError::SignatureError("feed bytes are not valid UTF-8".into()))?;
    let Some(marker_pos) = text.find(MARKER_START) else {
        return Ok(None);
    };
    if marker_pos == 0 || bytes[marker_pos - 1] != b'\n' {
        return Err(EngineError::SignatureError(
            "signature marker is not preceded by a newline".into(),
        ));
    }
    let payload = &bytes[..marker_pos];

    let rest = &text[marker_pos + MARKER_START.len()..];
    let Some(end_pos) = rest.find(MARKER_END) else {
        return Err(EngineError::SignatureError("unterminated signature block".into()));
    };
    let body = &rest[..end_pos];
    let after = &rest[end_pos + MARKER_END.len()..];
    if !after.is_empty() {
        return Err(EngineError::SignatureError(
            "trailing bytes after signature block end marker".into(),
        ));
    }

    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let sig_bytes = BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| EngineError::SignatureError(format!("invalid base64 in signature block: {e}")))?;
    Ok(Some((payload, sig_bytes)))
}

struct Helper<'a> {
    known: &'a [Cert],
    verdicts: Vec<SignatureVerdict>,
}

impl<'a> VerificationHelper for Helper<'a> {
    fn get_certs(&mut self, ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(self
            .known
            .iter()
            .filter(|cert| ids.iter().any(|id| id.aliases(cert.key_handle())))
            .cloned()
            .collect())
    }

    fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
        for layer in structure.into_iter() {
            let MessageLayer::SignatureGroup { results } = layer else {
                continue;
            };
            for result in results {
                let verdict = match result {
                    Ok(GoodChecksum { sig, ka, .. }) => {
                        let fingerprint = Fingerprint::new(ka.cert().fingerprint().to_hex().to_lowercase());
                        let timestamp = sig
                            .signature_creation_time()
                            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                            .map(|d| d.as_secs() as i64)
                            .unwrap_or(0);
                        SignatureVerdict::Valid { fingerprint, timestamp }
                    }
                    Err(VerificationError::MissingKey { sig }) => {
                        let keyid = sig
                            .issuers()
                            .next()
                            .map(|handle| handle.to_hex())
                            .unwrap_or_default();
                        SignatureVerdict::Missing { keyid }
                    }
                    Err(_) => SignatureVerdict::Bad,
                };
                self.verdicts.push(verdict);
            }
        }
        Ok(())
    }
}

/// Verify `sig_bytes` as a detached signature over `payload`, against
/// `known_certs` (spec.md §4.3 steps 1-2). Unknown signing keys come back
/// as [`SignatureVerdict::Missing`] rather than failing outright, so the
/// caller can retry after fetching the key.
pub fn verify_detached(payload: &[u8], sig_bytes: &[u8], known_certs: &[Cert]) -> Result<Vec<SignatureVerdict>> {
    let policy = StandardPolicy::new();
    let helper = Helper {
        known: known_certs,
        verdicts: Vec::new(),
    };
    let mut verifier = DetachedVerifierBuilder::from_bytes(sig_bytes)
        .map_err(|e| EngineError::SignatureError(format!("malformed signature packet: {e}")))?
        .with_policy(&policy, None, helper)
        .map_err(|e| EngineError::SignatureError(format!("could not start verifier: {e}")))?;
    verifier
        .verify_bytes(payload)
        .map_err(|e| EngineError::SignatureError(format!("verification failed: {e}")))?;
    Ok(verifier.into_helper().verdicts)
}

/// Look up a key by ID through the configured key server, returning the
/// parsed certificate if found (spec.md §4.3 step 3). Uses the HKP
/// `pks/lookup` convention any standard keyserver implements.
pub fn fetch_key(client: &reqwest::blocking::Client, keyserver: &str, keyid: &str) -> Result<Option<Cert>> {
    let url = format!("{}/pks/lookup?op=get&options=mr&search=0x{}", keyserver.trim_end_matches('/'), keyid);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| EngineError::network(&url, e))?;
    if !response.status().is_success() {
        return Ok(None);
    }
    let bytes = response.bytes().map_err(|e| EngineError::network(&url, e))?;
    match Cert::from_bytes(&bytes) {
        Ok(cert) => Ok(Some(cert)),
        Err(_) => Ok(None),
    }
}

/// Run the full trust decision for a fetched feed (spec.md §4.3 steps
/// 1-5): split the trailer, verify against `known_certs` (optionally
/// fetching missing keys via `keyserver`), and filter to signatures the
/// `trust_db` already accepts for the feed's domain. If none are already
/// trusted but one verified cryptographically, prompt through `handler`
/// and persist the decision.
pub fn check_trust(
    uri: &FeedUri,
    bytes: &[u8],
    trust_db: &mut TrustDb,
    known_certs: &[Cert],
    client: &reqwest::blocking::Client,
    keyserver: Option<&str>,
    handler: &dyn Handler,
    auto_approve: bool,
) -> Result<Fingerprint> {
    if uri.is_local() {
        return Err(EngineError::NotSupported(
            "check_trust called on a local feed; local feeds skip verification entirely".into(),
        ));
    }
    let domain = uri
        .domain()
        .ok_or_else(|| EngineError::SignatureError(format!("feed URI {uri} has no DNS domain")))?;

    let (payload, sig_bytes) = split_signature_block(bytes)?
        .ok_or_else(|| EngineError::SignatureError("feed carries no signature block".into()))?;

    let mut certs = known_certs.to_vec();
    let mut verdicts = verify_detached(payload, &sig_bytes, &certs)?;

    if let Some(keyserver) = keyserver {
        let missing: Vec<String> = verdicts
            .iter()
            .filter_map(|v| match v {
                SignatureVerdict::Missing { keyid } => Some(keyid.clone()),
                _ => None,
            })
            .collect();
        let mut fetched_any = false;
        for keyid in missing {
            if let Some(cert) = fetch_key(client, keyserver, &keyid)? {
                certs.push(cert);
                fetched_any = true;
            }
        }
        if fetched_any {
            verdicts = verify_detached(payload, &sig_bytes, &certs)?;
        }
    }

    let valid: Vec<(Fingerprint, i64)> = verdicts
        .into_iter()
        .filter_map(|v| match v {
            SignatureVerdict::Valid { fingerprint, timestamp } => Some((fingerprint, timestamp)),
            _ => None,
        })
        .collect();

    if let Some((fingerprint, _)) = valid.iter().find(|(fp, _)| trust_db.is_trusted(fp, &domain)) {
        return Ok(fingerprint.clone());
    }

    let Some((fingerprint, _)) = valid.into_iter().next() else {
        return Err(EngineError::SignatureError(format!(
            "no valid signature on feed from {domain}"
        )));
    };

    let approved = auto_approve
        || handler.confirm(&format!(
            "Trust key {fingerprint} to sign feeds from {domain}?"
        ));
    if !approved {
        return Err(EngineError::SignatureError(format!(
            "signature by {fingerprint} is valid but not trusted for {domain}"
        )));
    }
    trust_db.trust(fingerprint.clone(), domain);
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_signature_block_rejects_missing_trailer() {
        let bytes = b"<interface>no signature here</interface>";
        assert!(split_signature_block(bytes).unwrap().is_none());
    }

    #[test]
    fn split_signature_block_requires_preceding_newline() {
        let malformed = b"<interface/><!-- Base64 Signature\nAAAA\n-->\n";
        let err = split_signature_block(malformed).unwrap_err();
        assert!(matches!(err, EngineError::SignatureError(_)));
    }

    #[test]
    fn split_signature_block_rejects_trailing_bytes() {
        let malformed = b"<interface/>\n<!-- Base64 Signature\nAAAA\n-->\ntrailing garbage";
        let err = split_signature_block(malformed).unwrap_err();
        assert!(matches!(err, EngineError::SignatureError(_)));
    }

    #[test]
    fn split_signature_block_extracts_payload_and_decodes_base64() {
        let payload = b"<interface/>\n";
        let sig = b"hello signature bytes";
        let mut doc = payload.to_vec();
        doc.extend_from_slice(MARKER_START.as_bytes());
        doc.extend_from_slice(BASE64.encode(sig).as_bytes());
        doc.extend_from_slice(MARKER_END.as_bytes());

        let (parsed_payload, parsed_sig) = split_signature_block(&doc).unwrap().unwrap();
        assert_eq!(parsed_payload, payload);
        assert_eq!(parsed_sig, sig);
    }
}
