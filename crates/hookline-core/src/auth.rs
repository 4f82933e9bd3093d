//! # Standard Authenticators
//!
//! Ready-made request authentication for [`EventProcessor::authenticate`]
//! implementations: HMAC-SHA256 and HMAC-SHA1 body signatures, static bearer
//! tokens, and a no-op for integrations without a configured secret.
//!
//! Signatures are computed over the raw request body when the transport layer
//! attached one to the event, since re-serialised JSON is not byte-identical
//! to what the platform signed. All comparisons are constant-time and every
//! failure (missing header, malformed hex, mismatch) is a plain `false`.
//!
//! [`EventProcessor::authenticate`]: crate::processor::EventProcessor::authenticate

use crate::event::{EventHeaders, WebhookEvent};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

// ============================================================================
// SecretString
// ============================================================================

/// Secret value that is zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get the secret bytes (only for immediate use)
    pub fn expose_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

// ============================================================================
// Signature authenticators
// ============================================================================

/// Supported request authentication schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// Hex HMAC-SHA256 of the body, optionally prefixed `sha256=`
    HmacSha256,
    /// Hex HMAC-SHA1 of the body, optionally prefixed `sha1=`
    HmacSha1,
    /// Static token, optionally prefixed `Bearer `
    BearerToken,
}

/// Verifies one header against a shared secret.
///
/// # Examples
///
/// ```rust
/// use hookline_core::{EventHeaders, SecretString, SignatureAlgorithm, SignatureAuthenticator};
///
/// let auth = SignatureAuthenticator::new(
///     "Authorization",
///     SignatureAlgorithm::BearerToken,
///     SecretString::new("s3cret"),
/// );
///
/// let headers = EventHeaders::from_iter([("authorization", "Bearer s3cret")]);
/// assert!(auth.verify(b"{}", &headers));
/// assert!(!auth.verify(b"{}", &EventHeaders::new()));
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureAuthenticator {
    header_name: String,
    algorithm: SignatureAlgorithm,
    secret: SecretString,
}

impl SignatureAuthenticator {
    pub fn new(
        header_name: impl Into<String>,
        algorithm: SignatureAlgorithm,
        secret: SecretString,
    ) -> Self {
        Self {
            header_name: header_name.into(),
            algorithm,
            secret,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Verify the configured header against `raw_body`.
    pub fn verify(&self, raw_body: &[u8], headers: &EventHeaders) -> bool {
        if self.secret.is_empty() {
            warn!(header = %self.header_name, "Authenticator configured with empty secret");
            return false;
        }

        let Some(provided) = headers.get(&self.header_name) else {
            warn!(header = %self.header_name, "Authentication header missing");
            return false;
        };

        let verified = match self.algorithm {
            SignatureAlgorithm::HmacSha256 => {
                let hex_sig = provided.strip_prefix("sha256=").unwrap_or(provided);
                HmacSha256::new_from_slice(self.secret.expose_bytes())
                    .ok()
                    .is_some_and(|mac| verify_hex(mac, raw_body, hex_sig))
            }
            SignatureAlgorithm::HmacSha1 => {
                let hex_sig = provided.strip_prefix("sha1=").unwrap_or(provided);
                HmacSha1::new_from_slice(self.secret.expose_bytes())
                    .ok()
                    .is_some_and(|mac| verify_hex(mac, raw_body, hex_sig))
            }
            SignatureAlgorithm::BearerToken => {
                let token = provided.strip_prefix("Bearer ").unwrap_or(provided);
                bool::from(token.as_bytes().ct_eq(self.secret.expose_bytes()))
            }
        };

        if !verified {
            warn!(
                header = %self.header_name,
                algorithm = ?self.algorithm,
                "Request authentication failed"
            );
        }

        verified
    }

    /// Verify against the event's raw body, falling back to the re-serialised
    /// payload when no raw request is attached.
    pub fn authenticate_event(&self, event: &WebhookEvent) -> bool {
        match event.original_request() {
            Some(request) => self.verify(request.body(), event.headers()),
            None => match serde_json::to_vec(event.payload()) {
                Ok(body) => self.verify(&body, event.headers()),
                Err(_) => false,
            },
        }
    }
}

fn verify_hex<M: Mac>(mut mac: M, body: &[u8], hex_sig: &str) -> bool {
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ============================================================================
// Authentication
// ============================================================================

/// Per-integration authentication setting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authentication {
    /// No secret configured; every request is accepted
    #[default]
    None,
    Signature(SignatureAuthenticator),
}

impl Authentication {
    pub fn verify(&self, raw_body: &[u8], headers: &EventHeaders) -> bool {
        match self {
            Self::None => true,
            Self::Signature(authenticator) => authenticator.verify(raw_body, headers),
        }
    }

    pub fn authenticate_event(&self, event: &WebhookEvent) -> bool {
        match self {
            Self::None => true,
            Self::Signature(authenticator) => authenticator.authenticate_event(event),
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
