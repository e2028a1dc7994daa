//! Bearer-token authentication for the control-plane API.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

/// The caller a token resolved to. Carries only a fingerprint, never the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub token_fingerprint: String,
}

/// Decides whether a bearer token may use the API.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<Principal>;
}

/// Accepts a fixed set of tokens. Only SHA-256 digests are kept in memory.
pub struct StaticTokenAuthenticator {
    digests: Vec<[u8; 32]>,
}

impl StaticTokenAuthenticator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = tokens
            .into_iter()
            .filter(|t| !t.as_ref().is_empty())
            .map(|t| digest(t.as_ref()))
            .collect();
        Self { digests }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<Principal> {
        let presented = digest(token);
        // compare every digest without short-circuiting on the byte level
        let matched = self
            .digests
            .iter()
            .any(|known| known.iter().zip(presented.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0);
        matched.then(|| Principal {
            token_fingerprint: hex::encode(&presented[..6]),
        })
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
