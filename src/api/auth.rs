//! Bearer token authentication against the Keycloak realm
//!
//! Tokens are verified with the realm's JWKS, which is fetched lazily and
//! cached. The cache is refreshed when it ages out or when a token names a
//! key id the cache does not know yet, so realm key rotation is picked up
//! without a restart. Unknown key ids refetch at most once per
//! [`MIN_REFRESH_INTERVAL`].

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::ApiError;
use crate::config::settings::{AuthSettings, KeycloakSettings};

/// Identity extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: Option<String>,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

/// Verifies a raw bearer token
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Principal, ApiError>;
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    preferred_username: Option<String>,
    realm_access: Option<RealmAccess>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Shortest gap between two JWKS fetches triggered by unknown key ids
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// [`TokenValidator`] for tokens issued by a Keycloak realm
pub struct OidcValidator {
    issuer: String,
    jwks_url: String,
    refresh_interval: Duration,
    min_refresh_interval: Duration,
    cache: RwLock<Option<JwksCache>>,
    http: reqwest::Client,
}

impl OidcValidator {
    pub fn new(server_url: &str, realm: &str, refresh_interval: Duration) -> Self {
        let issuer = format!("{}/realms/{}", server_url.trim_end_matches('/'), realm);
        let jwks_url = format!("{}/protocol/openid-connect/certs", issuer);
        Self {
            issuer,
            jwks_url,
            refresh_interval,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            cache: RwLock::new(None),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_settings(keycloak: &KeycloakSettings, auth: &AuthSettings) -> Self {
        Self::new(
            &keycloak.server_url,
            &keycloak.realm,
            Duration::from_secs(auth.jwks_refresh_secs),
        )
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    async fn refresh(&self) -> Result<(), ApiError> {
        tracing::debug!(url = %self.jwks_url, "fetching JWKS");

        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::Internal(format!("Failed to fetch JWKS: {}", e)))?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("Invalid JWKS response: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    let kid = jwk.common.key_id.clone().unwrap_or_default();
                    keys.insert(kid, key);
                }
                Err(e) => tracing::warn!(kid = ?jwk.common.key_id, error = %e, "skipping unusable JWK"),
            }
        }

        if keys.is_empty() {
            return Err(ApiError::Internal("No usable keys found in JWKS".to_string()));
        }

        tracing::info!(key_count = keys.len(), "refreshed JWKS cache");
        *self.cache.write().await = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    async fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        let cache = cache.as_ref()?;
        if cache.fetched_at.elapsed() > self.refresh_interval {
            return None;
        }
        match cache.keys.get(kid) {
            Some(key) => Some(key.clone()),
            // tokens without a kid fall back to the only key, if there is just one
            None if kid.is_empty() && cache.keys.len() == 1 => cache.keys.values().next().cloned(),
            None => None,
        }
    }

    async fn recently_refreshed(&self) -> bool {
        self.cache
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.fetched_at.elapsed() < self.min_refresh_interval)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ApiError> {
        let unknown_kid =
            || ApiError::Unauthorized(format!("No matching key found in JWKS for kid '{}'", kid));

        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }
        if self.recently_refreshed().await {
            tracing::debug!(kid, "unknown key id, JWKS refreshed too recently to refetch");
            return Err(unknown_kid());
        }
        self.refresh().await?;
        self.cached_key(kid).await.ok_or_else(unknown_kid)
    }
}

#[async_trait]
impl TokenValidator for OidcValidator {
    async fn validate(&self, token: &str) -> Result<Principal, ApiError> {
        let header = decode_header(token)
            .map_err(|e| ApiError::Unauthorized(format!("Malformed token: {}", e)))?;
        let key = self
            .decoding_key(header.kid.as_deref().unwrap_or_default())
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        // Keycloak access tokens are audienced to "account" or the calling client
        validation.validate_aud = false;

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

        Ok(Principal {
            subject: data.claims.sub,
            username: data.claims.preferred_username,
            roles: data
                .claims
                .realm_access
                .map(|a| a.roles)
                .unwrap_or_default(),
        })
    }
}

/// Middleware state: who verifies tokens and which realm roles are accepted
pub struct Authenticator {
    validator: Arc<dyn TokenValidator>,
    allowed_roles: Vec<String>,
}

impl Authenticator {
    pub fn new(validator: Arc<dyn TokenValidator>, allowed_roles: Vec<String>) -> Self {
        Self {
            validator,
            allowed_roles,
        }
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal, ApiError> {
        // the scheme is case-insensitive
        let token = authorization
            .and_then(|v| v.trim().split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::Unauthorized("Missing or invalid Authorization header".to_string())
            })?;

        let principal = self.validator.validate(token).await?;

        if !principal
            .roles
            .iter()
            .any(|role| self.allowed_roles.contains(role))
        {
            return Err(ApiError::Forbidden(format!(
                "one of the roles [{}] is required",
                self.allowed_roles.join(", ")
            )));
        }

        Ok(principal)
    }
}

/// Rejects requests without a valid token carrying an allowed role
pub async fn require_role(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let principal = auth.authenticate(header).await?;
    tracing::debug!(
        subject = ?principal.subject,
        username = ?principal.username,
        "authenticated request"
    );

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
