use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRejection {
    Missing,
    Malformed,
    Mismatch,
}

impl SignatureRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureRejection::Missing => "signature_missing",
            SignatureRejection::Malformed => "signature_malformed",
            SignatureRejection::Mismatch => "signature_mismatch",
        }
    }
}

/// Verifies storefront webhook signatures.
///
/// Signature format: base64(HMAC-SHA256(app_secret, raw_body))
/// Header: X-Shopify-Hmac-Sha256
#[derive(Clone)]
pub struct WebhookSecurityService {
    secret: Vec<u8>,
}

impl WebhookSecurityService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), SignatureRejection> {
        let header = signature_header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureRejection::Missing)?;

        let expected = STANDARD
            .decode(header)
            .map_err(|_| SignatureRejection::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| SignatureRejection::Malformed)?;
        mac.update(payload);

        // Constant-time comparison
        mac.verify_slice(&expected)
            .map_err(|_| SignatureRejection::Mismatch)
    }

    /// Compute the header value for `payload`. Used by tests and local tooling.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            // HMAC accepts keys of any length.
            Err(_) => return String::new(),
        };
        mac.update(payload);
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_signature_is_accepted() {
        let service = WebhookSecurityService::new("test_secret_key_123");
        let payload = br#"{"id":900}"#;
        let signature = service.sign(payload);

        assert_eq!(STANDARD.decode(&signature).unwrap().len(), 32);
        assert!(service.verify_signature(payload, Some(&signature)).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let service = WebhookSecurityService::new("test_secret_key_123");
        let signature = service.sign(br#"{"id":900}"#);

        assert_eq!(
            service.verify_signature(br#"{"id":901}"#, Some(&signature)),
            Err(SignatureRejection::Mismatch)
        );
    }

    #[test]
    fn test_missing_or_garbled_header_is_rejected() {
        let service = WebhookSecurityService::new("secret");
        assert_eq!(service.verify_signature(b"{}", None), Err(SignatureRejection::Missing));
        assert_eq!(service.verify_signature(b"{}", Some("  ")), Err(SignatureRejection::Missing));
        assert_eq!(
            service.verify_signature(b"{}", Some("not base64!!")),
            Err(SignatureRejection::Malformed)
        );
    }

    #[test]
    fn test_other_secret_does_not_verify() {
        let signer = WebhookSecurityService::new("one");
        let verifier = WebhookSecurityService::new("two");
        let signature = signer.sign(b"payload");
        assert_eq!(
            verifier.verify_signature(b"payload", Some(&signature)),
            Err(SignatureRejection::Mismatch)
        );
    }
}
