//! LINE webhook signature verification.
//!
//! The platform signs the exact request body with HMAC-SHA256 keyed by the
//! channel secret and sends the base64 digest in `x-line-signature`. The
//! digest must be computed over the raw bytes as received; re-serialising the
//! JSON first changes whitespace and key order and breaks verification.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC-SHA256 digest of the raw body.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

const DIGEST_LEN: usize = 32;

/// Broad class of a verification failure, used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureErrorKind {
    /// The server is misconfigured; not the caller's fault.
    Configuration,
    /// The caller did not present a usable signature.
    Authentication,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("channel secret is not configured")]
    MissingSecret,
    #[error("channel secret cannot key HMAC-SHA256")]
    InvalidKey,
    #[error("signature header is missing")]
    MissingSignature,
    #[error("signature header is not valid base64")]
    MalformedSignature,
}

impl SignatureError {
    pub fn kind(&self) -> SignatureErrorKind {
        match self {
            SignatureError::MissingSecret | SignatureError::InvalidKey => {
                SignatureErrorKind::Configuration
            }
            SignatureError::MissingSignature | SignatureError::MalformedSignature => {
                SignatureErrorKind::Authentication
            }
        }
    }
}

fn digest(secret: &str, body: &[u8]) -> Result<[u8; DIGEST_LEN], SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Computes the base64 signature the platform would send for `body`.
///
/// ```
/// let sig = security::compute_signature("key", b"The quick brown fox jumps over the lazy dog").unwrap();
/// assert_eq!(sig, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
/// ```
pub fn compute_signature(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    digest(secret, body).map(|bytes| B64.encode(bytes))
}

/// Checks `provided` against the HMAC of `body`.
///
/// Returns `Ok(false)` for an ordinary mismatch. Errors are reserved for a
/// missing secret, a missing header (fails closed) and a header that is not
/// base64.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    provided: Option<&str>,
) -> Result<bool, SignatureError> {
    let expected = digest(secret, body)?;
    let provided = provided.ok_or(SignatureError::MissingSignature)?;
    let provided = B64
        .decode(provided)
        .map_err(|_| SignatureError::MalformedSignature)?;
    // Length is public, so an early return leaks nothing.
    if provided.len() != expected.len() {
        return Ok(false);
    }
    Ok(constant_time_eq(&provided, &expected))
}

/// Byte comparison whose running time depends only on the input length.
#[inline(never)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    std::hint::black_box(diff) == 0
}
