//! Cache key derivation.

use std::fmt;

use axum::http::{HeaderMap, Method};
use sha2::{Digest, Sha256};

/// Methods whose responses may be served from the cache.
pub fn is_cacheable_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::POST | Method::PUT | Method::PATCH)
}

/// Methods whose request body takes part in the key.
pub fn body_is_keyed(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Deterministic identifier of a cacheable request.
///
/// Hex SHA-256 over the method, target URI, the forwarded header set (sorted,
/// so header order does not matter) and the body bytes. Doubles as the
/// on-disk file name of the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(method: &Method, uri: &str, headers: &HeaderMap, body: &[u8]) -> Self {
        let mut pairs: Vec<(&str, &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes()))
            .collect();
        pairs.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(uri.as_bytes());
        hasher.update(b"\n");
        for (name, value) in pairs {
            hasher.update(name.as_bytes());
            hasher.update(b": ");
            hasher.update(value);
            hasher.update(b"\n");
        }
        hasher.update(b"\n");
        hasher.update(body);

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Rebuild a key from an artifact file name. Returns `None` for names
    /// that are not keys (temp files, header artifacts, strays).
    pub fn from_file_name(name: &str) -> Option<Self> {
        (name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()))
            .then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
