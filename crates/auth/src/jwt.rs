use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use relaygate_cache::SessionCache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// The verified subject of a token. Created on verification; immutable;
/// scoped to one request or one WebSocket connection (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub issued_at: DateTime<Utc>,
}

/// Claims carried by a relaygate access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub typ: String,
    pub jti: String,
}

const EXPECTED_TOKEN_TYPE: &str = "access";

/// Validates bearer tokens on the HTTP and WebSocket edges and extracts the
/// subject identity. See `SPEC_FULL.md` §4.C.
pub struct AuthVerifier {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    cache: Arc<dyn SessionCache>,
}

impl AuthVerifier {
    #[must_use]
    pub fn new(secret: &SecretString, algorithm: Algorithm, cache: Arc<dyn SessionCache>) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
        Self {
            decoding_key,
            algorithm,
            cache,
        }
    }

    /// Parse a bearer token out of an `Authorization` header value.
    pub async fn verify_http(&self, authorization: Option<&str>) -> Result<Identity> {
        let header = authorization.ok_or(Error::Missing)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Malformed("missing Bearer prefix".to_string()))?;
        self.verify_token(token).await
    }

    /// Browsers cannot set headers on a WebSocket upgrade, so the token
    /// arrives as a query parameter instead.
    pub async fn verify_ws(&self, query_token: Option<&str>) -> Result<Identity> {
        let token = query_token.ok_or(Error::Missing)?;
        self.verify_token(token).await
    }

    async fn verify_token(&self, token: &str) -> Result<Identity> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => Error::Expired,
                ErrorKind::InvalidAlgorithm => Error::BadAlgorithm,
                other => Error::Malformed(other.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.typ != EXPECTED_TOKEN_TYPE {
            return Err(Error::WrongType(claims.typ));
        }

        match self.cache.is_revoked(&claims.jti).await {
            Ok(true) => return Err(Error::Revoked),
            Ok(false) => {},
            Err(err) => {
                warn!(%err, jti = %claims.jti, "revocation check failed, treating as unauthenticated");
                return Err(Error::CacheUnavailable(err.to_string()));
            },
        }

        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or_else(|| {
            Error::Malformed("issued-at timestamp out of range".to_string())
        })?;

        Ok(Identity {
            subject: claims.sub,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use relaygate_cache::{Error as CacheError, Result as CacheResult};
    use relaygate_protocol::HotBufferEntry;

    use super::*;

    struct FakeCache {
        revoked: Mutex<HashSet<String>>,
    }

    impl FakeCache {
        fn new() -> Self {
            Self {
                revoked: Mutex::new(HashSet::new()),
            }
        }

        fn revoke(&self, jti: &str) {
            self.revoked.lock().unwrap().insert(jti.to_string());
        }
    }

    #[async_trait]
    impl SessionCache for FakeCache {
        async fn append_chunk(&self, _: &str, _: &HotBufferEntry) -> CacheResult<()> {
            Ok(())
        }
        async fn read_recent(&self, _: &str, _: usize) -> CacheResult<Vec<HotBufferEntry>> {
            Ok(vec![])
        }
        async fn get_user_key(&self, _: &str, _: &str) -> CacheResult<Option<String>> {
            Ok(None)
        }
        async fn set_user_key(&self, _: &str, _: &str, _: &str) -> CacheResult<()> {
            Ok(())
        }
        async fn is_revoked(&self, jti: &str) -> CacheResult<bool> {
            Ok(self.revoked.lock().unwrap().contains(jti))
        }
        async fn health_check(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    fn token_with_claims(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier(cache: Arc<dyn SessionCache>) -> AuthVerifier {
        AuthVerifier::new(
            &SecretString::from("test-secret".to_string()),
            Algorithm::HS256,
            cache,
        )
    }

    #[tokio::test]
    async fn verify_http_accepts_valid_bearer_token() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now,
            exp: now + 3600,
            typ: "access".to_string(),
            jti: "jti-1".to_string(),
        };
        let token = token_with_claims(&claims, "test-secret");
        let cache: Arc<dyn SessionCache> = Arc::new(FakeCache::new());
        let v = verifier(cache);

        let identity = v
            .verify_http(Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(identity.subject, "alice");
    }

    #[tokio::test]
    async fn verify_http_rejects_missing_header() {
        let cache: Arc<dyn SessionCache> = Arc::new(FakeCache::new());
        let v = verifier(cache);
        assert_eq!(v.verify_http(None).await.unwrap_err(), Error::Missing);
    }

    #[tokio::test]
    async fn verify_rejects_expired_token() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            typ: "access".to_string(),
            jti: "jti-2".to_string(),
        };
        let token = token_with_claims(&claims, "test-secret");
        let cache: Arc<dyn SessionCache> = Arc::new(FakeCache::new());
        let v = verifier(cache);
        assert_eq!(
            v.verify_ws(Some(&token)).await.unwrap_err(),
            Error::Expired
        );
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token_type() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now,
            exp: now + 3600,
            typ: "refresh".to_string(),
            jti: "jti-3".to_string(),
        };
        let token = token_with_claims(&claims, "test-secret");
        let cache: Arc<dyn SessionCache> = Arc::new(FakeCache::new());
        let v = verifier(cache);
        assert_eq!(
            v.verify_ws(Some(&token)).await.unwrap_err(),
            Error::WrongType("refresh".to_string())
        );
    }

    #[tokio::test]
    async fn verify_rejects_revoked_token() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now,
            exp: now + 3600,
            typ: "access".to_string(),
            jti: "jti-4".to_string(),
        };
        let token = token_with_claims(&claims, "test-secret");
        let fake = FakeCache::new();
        fake.revoke("jti-4");
        let cache: Arc<dyn SessionCache> = Arc::new(fake);
        let v = verifier(cache);
        assert_eq!(v.verify_ws(Some(&token)).await.unwrap_err(), Error::Revoked);
    }

    #[tokio::test]
    async fn verify_rejects_garbage_token() {
        let cache: Arc<dyn SessionCache> = Arc::new(FakeCache::new());
        let v = verifier(cache);
        assert!(matches!(
            v.verify_ws(Some("not-a-jwt")).await,
            Err(Error::Malformed(_))
        ));
    }
}
