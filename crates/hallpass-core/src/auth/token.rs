//! Client-side inspection of bearer tokens.
//!
//! Tokens are three dot-separated segments with a base64url JSON payload in
//! the middle. Nothing here verifies a signature: these checks only decide
//! whether a stored token is worth presenting, they are not a trust boundary.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Number of dot-separated segments in a well-formed token
const TOKEN_SEGMENTS: usize = 3;

/// URL-safe alphabet that accepts payloads with or without trailing padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims decoded from the payload segment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiration instant in seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<f64>,

    /// Every other claim, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Expiration as a timestamp, if the claim is present and representable
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp?;
        DateTime::from_timestamp_millis((exp * 1000.0) as i64)
    }

    /// A token without an `exp` claim never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp * 1000.0 < now.timestamp_millis() as f64,
            None => false,
        }
    }
}

/// Decode the payload of a token without verifying it.
///
/// Returns `None` if the token does not have exactly three segments, or if
/// the middle segment is not base64url-encoded JSON describing an object.
pub fn decode(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != TOKEN_SEGMENTS {
        return None;
    }

    let bytes = PAYLOAD_ENGINE.decode(segments[1]).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Check expiry against the current time.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// Undecodable tokens count as expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode(token) {
        Some(claims) => claims.is_expired_at(now),
        None => true,
    }
}

/// A token is valid when it is present, non-empty and not expired
pub fn is_valid(token: Option<&str>) -> bool {
    match token {
        Some(t) if !t.is_empty() => !is_expired(t),
        _ => false,
    }
}
