//! Proxy credential gate.
//!
//! Validates `Proxy-Authorization: Basic <b64>` against the single configured
//! `user:pass` credential. The header is always removed from the request so it
//! can never reach an upstream.

use axum::http::{header::PROXY_AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Result of running the gate over a request's headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    Unauthorized,
}

impl AuthOutcome {
    pub fn is_authorized(self) -> bool {
        self == AuthOutcome::Authorized
    }
}

/// The configured proxy credential, if any.
#[derive(Debug, Clone, Default)]
pub struct ProxyAuth {
    credential: Option<String>,
}

impl ProxyAuth {
    pub fn new(credential: Option<String>) -> Self {
        if credential.as_deref().is_some_and(|c| !c.contains(':')) {
            tracing::warn!("Proxy credential has no `user:` part; clients must send it verbatim");
        }
        Self { credential }
    }

    /// Check the request headers and strip every `Proxy-Authorization` value.
    pub fn authorize(&self, headers: &mut HeaderMap) -> AuthOutcome {
        let presented = headers
            .get(PROXY_AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(decode_basic);
        headers.remove(PROXY_AUTHORIZATION);

        let Some(expected) = &self.credential else {
            return AuthOutcome::Authorized;
        };

        match presented {
            Some(value) if value == *expected => AuthOutcome::Authorized,
            Some(_) => {
                tracing::debug!("Proxy credentials rejected");
                AuthOutcome::Unauthorized
            }
            None => {
                tracing::debug!("Proxy credentials missing or malformed");
                AuthOutcome::Unauthorized
            }
        }
    }
}

/// Decode the payload of a `Basic` authorization value.
fn decode_basic(value: &str) -> Option<String> {
    let (scheme, payload) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-authorization", HeaderValue::from_str(value).unwrap());
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers
    }

    fn basic(credential: &str) -> String {
        format!("Basic {}", STANDARD.encode(credential))
    }

    #[test]
    fn open_gate_authorizes_everything_but_still_strips() {
        let gate = ProxyAuth::new(None);
        let mut headers = headers_with(&basic("someone:else"));
        assert!(gate.authorize(&mut headers).is_authorized());
        assert!(headers.get(PROXY_AUTHORIZATION).is_none());
        assert!(headers.get("accept").is_some());
    }

    #[test]
    fn missing_wrong_and_correct_credentials() {
        let gate = ProxyAuth::new(Some("user:pass".into()));

        let mut none = HeaderMap::new();
        assert_eq!(gate.authorize(&mut none), AuthOutcome::Unauthorized);

        let mut wrong = headers_with(&basic("user:nope"));
        assert_eq!(gate.authorize(&mut wrong), AuthOutcome::Unauthorized);
        assert!(wrong.get(PROXY_AUTHORIZATION).is_none());

        let mut right = headers_with(&basic("user:pass"));
        assert_eq!(gate.authorize(&mut right), AuthOutcome::Authorized);
        assert!(right.get(PROXY_AUTHORIZATION).is_none());
    }

    #[test]
    fn credential_without_colon_matches_exactly() {
        let gate = ProxyAuth::new(Some("token".into()));

        let mut right = headers_with(&basic("token"));
        assert!(gate.authorize(&mut right).is_authorized());

        let mut padded = headers_with(&basic("token:"));
        assert!(!gate.authorize(&mut padded).is_authorized());
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let gate = ProxyAuth::new(Some("user:pass".into()));
        let mut headers = headers_with(&format!("bAsIc {}", STANDARD.encode("user:pass")));
        assert!(gate.authorize(&mut headers).is_authorized());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        let gate = ProxyAuth::new(Some("user:pass".into()));
        let mut bearer = headers_with("Bearer user:pass");
        assert!(!gate.authorize(&mut bearer).is_authorized());
        let mut garbage = headers_with("Basic !!!not-base64");
        assert!(!gate.authorize(&mut garbage).is_authorized());
    }
}
