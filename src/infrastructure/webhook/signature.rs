//! HMAC-SHA256 verification of the inbound webhook signature (§6.1).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// No secret configured; verification was skipped entirely.
    Unconfigured,
    Valid,
    Invalid,
}

/// Verifies `signature_header` (the raw `X-Webhook-Signature` value, with or
/// without a `sha256=` prefix) against `body` computed under `secret`.
///
/// Returns `Unconfigured` when `secret` is empty — callers decide whether
/// that is acceptable (it is, per §4.1 step 3, for first-run deployments).
pub fn verify(secret: &str, body: &[u8], signature_header: Option<&str>) -> SignatureVerdict {
    if secret.is_empty() {
        return SignatureVerdict::Unconfigured;
    }

    let Some(header) = signature_header else {
        return SignatureVerdict::Invalid;
    };

    let provided_hex = header.strip_prefix("sha256=").unwrap_or(header);
    let Ok(provided) = hex::decode(provided_hex) else {
        return SignatureVerdict::Invalid;
    };

    let expected = compute(secret, body);
    if expected.ct_eq(&provided).into() {
        SignatureVerdict::Valid
    } else {
        SignatureVerdict::Invalid
    }
}

fn compute(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        format!("sha256={}", hex::encode(compute(secret, body)))
    }

    #[test]
    fn valid_signature_with_prefix_is_accepted() {
        let secret = "a".repeat(32);
        let body = br#"{"event":"statusChange"}"#;
        let header = sign(&secret, body);
        assert_eq!(verify(&secret, body, Some(&header)), SignatureVerdict::Valid);
    }

    #[test]
    fn valid_signature_without_prefix_is_accepted() {
        let secret = "a".repeat(32);
        let body = br#"{"event":"statusChange"}"#;
        let header = sign(&secret, body);
        let bare = header.strip_prefix("sha256=").unwrap();
        assert_eq!(verify(&secret, body, Some(bare)), SignatureVerdict::Valid);
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = "a".repeat(32);
        let header = sign(&secret, b"original");
        assert_eq!(verify(&secret, b"tampered", Some(&header)), SignatureVerdict::Invalid);
    }

    #[test]
    fn missing_header_is_rejected_when_secret_configured() {
        let secret = "a".repeat(32);
        assert_eq!(verify(&secret, b"body", None), SignatureVerdict::Invalid);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        let secret = "a".repeat(32);
        assert_eq!(verify(&secret, b"body", Some("sha256=not-hex")), SignatureVerdict::Invalid);
    }

    #[test]
    fn empty_secret_skips_verification() {
        assert_eq!(verify("", b"body", None), SignatureVerdict::Unconfigured);
    }
}
