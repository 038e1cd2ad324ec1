//! Webhook binding registry: HMAC-SHA256 signature verification and body
//! size enforcement for inbound triggers, decoupled from the HTTP transport
//! (`conductor-serve` owns the actual listener; this module owns the part
//! that must not vary by transport).

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Result, RuntimeError};

type HmacSha256 = Hmac<Sha256>;

/// A single registered webhook endpoint: `path` is matched exactly (no
/// globbing) against the transport's routed sub-path, `secret` verifies the
/// inbound `X-Signature: sha256=<hex>` header over the raw body, and
/// `max_body_bytes` bounds the request body before any side effect runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBinding {
    pub path: String,
    pub secret: String,
    pub target_workflow: String,
    pub max_body_bytes: usize,
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 1 << 20;

impl WebhookBinding {
    pub fn new(path: impl Into<String>, secret: impl Into<String>, target_workflow: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
            target_workflow: target_workflow.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

/// Computes the expected signature header value (`sha256=<hex>`) for a body
/// under a binding's secret. Exposed for callers that need to produce test
/// fixtures or mirror an upstream signer.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a body against an `X-Signature` header value, constant-time via
/// `hmac`'s `Mac::verify_slice`. Returns a `usage` error on a malformed
/// header (wrong prefix or non-hex digest) and an `agent` error — read by
/// callers as "unauthorized" — on a signature that does not match.
pub fn verify(secret: &str, body: &[u8], signature_header: &str) -> Result<()> {
    let hex_digest = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| RuntimeError::usage("signature header must be in 'sha256=<hex>' form"))?;
    let expected = hex::decode(hex_digest).map_err(|_| RuntimeError::usage("signature header is not valid hex"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| RuntimeError::agent("webhook signature does not match"))
}

/// Enforces the binding's body-size limit before any signature check or
/// side effect runs (an oversized body is rejected cheaply).
pub fn check_body_size(binding: &WebhookBinding, body_len: usize) -> Result<()> {
    if body_len > binding.max_body_bytes {
        return Err(RuntimeError::capacity(format!(
            "webhook body of {body_len} bytes exceeds limit of {} bytes",
            binding.max_body_bytes
        )));
    }
    Ok(())
}
