//! Service account access tokens
//!
//! Tokens come from the realm's OpenID Connect token endpoint using the
//! `client_credentials` grant. When a cache file is configured, a token is
//! reused until it is within 30 seconds of expiry.

use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::credentials::{CachedToken, ServiceAccount, TokenCache};
use crate::error::{ClientError, Result};
use crate::http::build_http_client;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Where a provider persists its tokens
#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub profile: String,
}

/// Fetches and caches access tokens for one service account
pub struct TokenProvider {
    http: reqwest::Client,
    base: Url,
    realm: String,
    account: ServiceAccount,
    cache: Option<CacheLocation>,
}

impl TokenProvider {
    /// Create a provider for `base` (scheme and host of the deployment)
    pub fn new(base: Url, realm: impl Into<String>, account: ServiceAccount) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            base,
            realm: realm.into(),
            account,
            cache: None,
        })
    }

    /// Persist tokens to a cache file under the given profile
    pub fn with_cache(mut self, location: CacheLocation) -> Self {
        self.cache = Some(location);
        self
    }

    fn token_url(&self) -> Result<Url> {
        Ok(self.base.join(&format!(
            "auth/realms/{}/protocol/openid-connect/token",
            self.realm
        ))?)
    }

    /// A valid access token, from the cache when possible
    pub async fn token(&self) -> Result<String> {
        let issuer = self.token_url()?;
        if let Some(location) = &self.cache {
            match TokenCache::load_from(&location.path) {
                Ok(cache) => {
                    if let Some(cached) = cache.get(&location.profile) {
                        if !cached.belongs_to(issuer.as_str(), &self.account.client_id) {
                            tracing::debug!(profile = %location.profile, "cached access token is for another deployment or client");
                        } else if cached.is_valid_at(Utc::now()) {
                            tracing::debug!(profile = %location.profile, "using cached access token");
                            return Ok(cached.access_token.clone());
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "ignoring unreadable token cache"),
            }
        }

        let token = self.request_token().await?;

        if let Some(location) = &self.cache {
            let mut cache = TokenCache::load_from(&location.path).unwrap_or_default();
            cache.set(&location.profile, token.clone());
            if let Err(e) = cache.save_to(&location.path) {
                tracing::warn!(error = %e, "failed to write token cache");
            }
        }

        Ok(token.access_token)
    }

    /// Request a fresh token, bypassing the cache
    pub async fn request_token(&self) -> Result<CachedToken> {
        let url = self.token_url()?;
        tracing::debug!(url = %url, client_id = %self.account.client_id, "requesting access token");

        let response = self
            .http
            .post(url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.account.client_id.as_str()),
                ("client_secret", self.account.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error_description")
                        .or_else(|| v.get("error"))
                        .and_then(|e| e.as_str())
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(ClientError::AuthFailed {
                message: format!(
                    "{} {} ({})",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default(),
                    detail
                ),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        Ok(CachedToken::expiring_in(
            parsed.access_token,
            parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            Utc::now(),
        )
        .issued_by(url.as_str(), self.account.client_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> TokenProvider {
        TokenProvider::new(
            Url::parse(&server.uri()).unwrap(),
            "insights",
            ServiceAccount::new("svc", "s3cret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/realms/insights/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=svc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "tok", "expires_in": 60})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(provider(&server).token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_request_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"error": "unauthorized_client"})),
            )
            .mount(&server)
            .await;

        let err = provider(&server).token().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to request access token: 401 Unauthorized (unauthorized_client)"
        );
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "fresh", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let location = CacheLocation {
            path: dir.path().join("credentials.yaml"),
            profile: "default".to_string(),
        };
        let provider = provider(&server).with_cache(location.clone());

        assert_eq!(provider.token().await.unwrap(), "fresh");
        // Second call is served from the cache file
        assert_eq!(provider.token().await.unwrap(), "fresh");

        let cache = TokenCache::load_from(&location.path).unwrap();
        assert_eq!(cache.get("default").unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_cached_token_not_sent_to_other_deployment() {
        let first = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "token-a", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&first)
            .await;
        let second = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("client_id=other"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "token-b", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&second)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let location = CacheLocation {
            path: dir.path().join("credentials.yaml"),
            profile: "default".to_string(),
        };

        let a = provider(&first).with_cache(location.clone());
        assert_eq!(a.token().await.unwrap(), "token-a");

        let b = TokenProvider::new(
            Url::parse(&second.uri()).unwrap(),
            "insights",
            ServiceAccount::new("other", "s3cret"),
        )
        .unwrap()
        .with_cache(location.clone());
        assert_eq!(b.token().await.unwrap(), "token-b");

        let cache = TokenCache::load_from(&location.path).unwrap();
        assert_eq!(cache.get("default").unwrap().client_id, "other");
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "new", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        let mut cache = TokenCache::default();
        cache.set("default", CachedToken::expiring_in("old", 10, Utc::now()));
        cache.save_to(&path).unwrap();

        let provider = provider(&server).with_cache(CacheLocation {
            path,
            profile: "default".to_string(),
        });
        assert_eq!(provider.token().await.unwrap(), "new");
    }
}
