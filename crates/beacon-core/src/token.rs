//! Access token inspection.
//!
//! Tokens are expected to be three dot-separated base64url segments whose
//! middle segment is a JSON object with an `exp` claim (epoch seconds).
//! Anything else is treated as a development token and never refreshed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Expiry assumed for tokens that carry none.
pub const DEV_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Claims the client reads from an access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Expiry, in seconds since the Unix epoch.
    pub exp: u64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<u64>,
}

/// Why a token could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 segments, found {0}")]
    Segments(usize),

    #[error("payload is not valid base64url: {0}")]
    Base64(String),

    #[error("payload is not a claims object: {0}")]
    Claims(String),
}

/// Decode the claims segment of a token without verifying its signature.
///
/// # Errors
///
/// Returns an error if the token is not three segments or the middle
/// segment is not base64url-encoded JSON with an `exp` claim.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Segments(segments.len()));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    serde_json::from_slice(&raw).map_err(|e| DecodeError::Claims(e.to_string()))
}

/// Whether a token is a development placeholder.
#[must_use]
pub fn is_dev_token(token: &str) -> bool {
    let token = token.trim().to_ascii_lowercase();
    token == "dev"
        || ["dev-", "dev_", "dev.", "mock-", "test-"]
            .iter()
            .any(|prefix| token.starts_with(prefix))
        || token.contains("dev-token")
        || token.contains("placeholder")
}

/// Whether a provider key is a placeholder, meaning the provider is unconfigured.
#[must_use]
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    key.is_empty()
        || key == "changeme"
        || ["dummy", "placeholder", "your-", "your_"]
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

/// When a token should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Never refresh; the token is assumed valid until `expires_at`.
    Never { expires_at: u64 },
    /// Refresh after `delay`; the token expires at `expires_at`.
    After { delay: Duration, expires_at: u64 },
}

impl RefreshPlan {
    /// Plan the refresh of `token` given the current time in epoch seconds.
    #[must_use]
    pub fn for_token(token: &str, now_secs: u64, margin: Duration) -> Self {
        let never = RefreshPlan::Never {
            expires_at: now_secs + DEV_TOKEN_LIFETIME.as_secs(),
        };
        if is_dev_token(token) {
            return never;
        }
        match decode_claims(token) {
            Ok(claims) => {
                let due = claims.exp.saturating_sub(margin.as_secs());
                RefreshPlan::After {
                    delay: Duration::from_secs(due.saturating_sub(now_secs)),
                    expires_at: claims.exp,
                }
            }
            Err(_) => never,
        }
    }

    #[must_use]
    pub fn expires_at(&self) -> u64 {
        match self {
            RefreshPlan::Never { expires_at } | RefreshPlan::After { expires_at, .. } => {
                *expires_at
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_decode_claims() {
        let claims = decode_claims(&jwt(r#"{"exp": 2000, "sub": "user-1"}"#)).unwrap();
        assert_eq!(claims.exp, 2000);
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.iat, None);
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let token = format!("h.{}.s", URL_SAFE.encode(r#"{"exp": 1}"#));
        assert_eq!(decode_claims(&token).unwrap().exp, 1);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_claims("opaque"), Err(DecodeError::Segments(1)));
        assert!(matches!(decode_claims("a.!!!.c"), Err(DecodeError::Base64(_))));
        assert!(matches!(
            decode_claims(&jwt(r#"{"sub": "no-exp"}"#)),
            Err(DecodeError::Claims(_))
        ));
    }

    #[test]
    fn test_dev_tokens() {
        for token in ["dev", "dev-abc", "DEV_1", "dev.local", "mock-token", "test-123", "my-dev-token", "placeholder"] {
            assert!(is_dev_token(token), "{token} should be a dev token");
        }
        assert!(!is_dev_token(&jwt(r#"{"exp": 1}"#)));
        assert!(!is_dev_token("developer"));
    }

    #[test]
    fn test_placeholder_keys() {
        for key in ["", "dummy", "dummy-key", "PLACEHOLDER", "changeme", "your-key-here", "your_app_key"] {
            assert!(is_placeholder_key(key), "{key:?} should be a placeholder");
        }
        assert!(!is_placeholder_key("a1b2c3d4"));
    }

    #[test]
    fn test_refresh_plan() {
        let margin = Duration::from_secs(60);

        let plan = RefreshPlan::for_token(&jwt(r#"{"exp": 1000}"#), 400, margin);
        assert_eq!(
            plan,
            RefreshPlan::After {
                delay: Duration::from_secs(540),
                expires_at: 1000
            }
        );

        let overdue = RefreshPlan::for_token(&jwt(r#"{"exp": 1000}"#), 990, margin);
        assert!(matches!(overdue, RefreshPlan::After { delay, .. } if delay.is_zero()));

        let dev = RefreshPlan::for_token("dev-token", 400, margin);
        assert_eq!(dev.expires_at(), 400 + DEV_TOKEN_LIFETIME.as_secs());
        assert!(matches!(dev, RefreshPlan::Never { .. }));

        // Well-formed but recognizably a dev token.
        let shaped = RefreshPlan::for_token(&format!("dev-{}", jwt(r#"{"exp": 1000}"#)), 400, margin);
        assert!(matches!(shaped, RefreshPlan::Never { .. }));
    }
}
