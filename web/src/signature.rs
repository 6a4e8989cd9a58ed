//! `Stripe-Signature` verification for payment callbacks.
//!
//! The processor signs each callback with the endpoint secret:
//!
//! ```text
//! Stripe-Signature: t=1735689600,v1=5257a869e7ecebeda32affa62cdca3fa51cad7e77a0e56ff536d0ce8e108d8bd
//! ```
//!
//! `v1` is the hex HMAC-SHA256 of `"{t}.{raw body}"`. A header may carry
//! several `v1` entries while secrets are rolled; any match is accepted.
//! Timestamps further than the tolerance from the engine clock are refused.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the callback signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Default allowed distance between the signed timestamp and now
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Why a callback signature was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// No `Stripe-Signature` header
    #[error("missing signature header")]
    Missing,

    /// The header has no usable `t` or `v1` entry
    #[error("malformed signature header")]
    Malformed,

    /// The signed timestamp is outside the tolerance
    #[error("signature timestamp outside tolerance")]
    Stale,

    /// No `v1` entry matches the payload
    #[error("signature does not match payload")]
    Mismatch,
}

/// Verifies callback signatures against the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Arc<str>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Verifier for `secret` (`whsec_...`) with the default tolerance
    #[must_use]
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Override the timestamp tolerance
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Check a `Stripe-Signature` header against the raw body.
    ///
    /// `now` is the current Unix time in seconds.
    ///
    /// # Errors
    ///
    /// - `Missing`: no header
    /// - `Malformed`: no timestamp or no `v1` entry
    /// - `Stale`: timestamp outside the tolerance
    /// - `Mismatch`: no `v1` entry matches
    pub fn verify(&self, header: Option<&str>, payload: &[u8], now: i64) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::Missing)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        if now.abs_diff(timestamp) > self.tolerance.as_secs() {
            return Err(SignatureError::Stale);
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures
            .iter()
            .filter_map(|signature| hex::decode(signature).ok())
            .any(|expected| mac.clone().verify_slice(&expected).is_ok());
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Header value the processor would send for `payload` at `timestamp`.
    ///
    /// # Errors
    ///
    /// `Malformed` if the secret cannot key the MAC.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_735_689_600;
    const BODY: &[u8] = br#"{"type":"checkout.session.completed"}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test")
    }

    #[test]
    fn test_signed_payload_verifies() {
        let header = verifier().sign(BODY, NOW).unwrap();
        assert!(header.starts_with(&format!("t={NOW},v1=")));
        assert_eq!(verifier().verify(Some(&header), BODY, NOW + 10), Ok(()));
    }

    #[test]
    fn test_tampered_payload_is_refused() {
        let header = verifier().sign(BODY, NOW).unwrap();
        let tampered = br#"{"type":"checkout.session.completed","x":1}"#;
        assert_eq!(
            verifier().verify(Some(&header), tampered, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_other_secret_is_refused() {
        let header = WebhookVerifier::new("whsec_other").sign(BODY, NOW).unwrap();
        assert_eq!(
            verifier().verify(Some(&header), BODY, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_timestamp_outside_tolerance_is_refused() {
        let header = verifier().sign(BODY, NOW).unwrap();
        assert_eq!(
            verifier().verify(Some(&header), BODY, NOW + 301),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verifier()
                .with_tolerance(Duration::from_secs(600))
                .verify(Some(&header), BODY, NOW + 301),
            Ok(())
        );
    }

    #[test]
    fn test_any_matching_v1_entry_is_accepted() {
        let signed = verifier().sign(BODY, NOW).unwrap();
        let v1 = signed.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1={},v0=legacy,v1={v1}", "00".repeat(32));
        assert_eq!(verifier().verify(Some(&header), BODY, NOW), Ok(()));
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(verifier().verify(None, BODY, NOW), Err(SignatureError::Missing));
        assert_eq!(
            verifier().verify(Some("v1=abcd"), BODY, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verifier().verify(Some(&format!("t={NOW}")), BODY, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verifier().verify(Some(&format!("t={NOW},v1=not-hex")), BODY, NOW),
            Err(SignatureError::Mismatch)
        );
    }
}
