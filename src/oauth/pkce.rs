//! PKCE helpers (RFC 7636)
//!
//! The verifier for a federated login lives in a dedicated cookie between
//! the redirect to the provider and the callback. It is stored the way the
//! identity provider's browser SDK stores it: `base64-` followed by the
//! base64url encoding of the JSON-quoted verifier.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
};
use sha2::{Digest, Sha256};

const BASE64_PREFIX: &str = "base64-";

/// Freshly generated verifier and its S256 challenge
#[derive(Clone)]
pub struct PkcePair {
    /// Secret kept by us until the code exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent to the provider
    pub challenge: String,
}

/// Generate PKCE code verifier and challenge
#[must_use]
pub fn generate_pkce() -> PkcePair {
    let verifier_bytes: [u8; 32] = rand::random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = s256_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// S256 transform of a verifier
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Encode a verifier for its transport cookie
#[must_use]
pub fn encode_verifier_cookie(verifier: &str) -> String {
    format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(format!("\"{verifier}\"")))
}

/// Recover a verifier from its transport cookie.
///
/// Accepts the `base64-` form (base64url or standard alphabet, padded or
/// not) as well as a raw value, and strips JSON quoting. Returns `None`
/// when nothing usable remains.
#[must_use]
pub fn decode_verifier_cookie(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let decoded = match raw.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD
                .decode(encoded)
                .or_else(|_| URL_SAFE.decode(encoded))
                .or_else(|_| STANDARD.decode(encoded))
                .ok()?;
            String::from_utf8(bytes).ok()?
        }
        None => raw.to_string(),
    };

    let verifier = decoded.replace('"', "");
    let verifier = verifier.trim();
    (!verifier.is_empty()).then(|| verifier.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_verifier_is_base64url_safe() {
        for _ in 0..10 {
            let pair = generate_pkce();
            assert!(pair.verifier.len() >= 43);
            for value in [&pair.verifier, &pair.challenge] {
                assert!(!value.contains('+'));
                assert!(!value.contains('/'));
                assert!(!value.contains('='));
            }
        }
    }

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let pair = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        assert_eq!(pair.challenge, URL_SAFE_NO_PAD.encode(hasher.finalize()));
    }

    #[test]
    fn rfc7636_appendix_b_vector() {
        assert_eq!(
            s256_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_cookie_round_trips() {
        let pair = generate_pkce();
        let cookie = encode_verifier_cookie(&pair.verifier);
        assert!(cookie.starts_with("base64-"));
        assert_eq!(decode_verifier_cookie(&cookie), Some(pair.verifier));
    }

    #[test]
    fn decodes_standard_alphabet_with_padding() {
        let encoded = format!("base64-{}", STANDARD.encode("\"my-verifier\""));
        assert_eq!(decode_verifier_cookie(&encoded).as_deref(), Some("my-verifier"));
    }

    #[test]
    fn accepts_raw_quoted_value() {
        assert_eq!(decode_verifier_cookie("\"raw-verifier\"").as_deref(), Some("raw-verifier"));
        assert_eq!(decode_verifier_cookie("plain").as_deref(), Some("plain"));
    }

    #[test]
    fn empty_or_undecodable_is_none() {
        assert_eq!(decode_verifier_cookie(""), None);
        assert_eq!(decode_verifier_cookie("\"\""), None);
        assert_eq!(decode_verifier_cookie("base64-!!!not base64!!!"), None);
    }
}
