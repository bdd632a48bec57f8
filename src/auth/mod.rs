//! Bearer-token authentication for the dashboard endpoints
//!
//! Tokens are HS256 JWTs carrying the user id. The id is mapped to the
//! username that owns the analytics data, and that mapping is cached.

use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::storage::{Storage, StorageError};

const OWNER_CACHE_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    #[serde(default)]
    pub role: String,
    /// Unix seconds. Checked when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("user '{0}' has no username mapping")]
    UnknownUser(String),
    #[error("owner lookup failed: {0}")]
    Lookup(#[from] StorageError),
}

/// Username whose analytics the authenticated caller may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity(pub String);

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    storage: Arc<dyn Storage>,
    owners: Cache<String, String>,
}

impl AuthService {
    pub fn new(config: &AuthConfig, storage: Arc<dyn Storage>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            storage,
            owners: Cache::builder()
                .max_capacity(OWNER_CACHE_MAX_CAPACITY)
                .time_to_live(Duration::from_secs(config.owner_cache_ttl_secs))
                .build(),
        }
    }

    /// Sign a token for `user_id`, valid for `ttl`
    pub fn issue_token(&self, user_id: &str, role: &str, ttl: Duration) -> Result<String> {
        let exp = (chrono::Utc::now().timestamp().max(0) as u64).saturating_add(ttl.as_secs());
        let claims = Claims {
            id: user_id.to_string(),
            role: role.to_string(),
            exp: Some(exp),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign token")
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Username mapped to `user_id`. Only successful lookups are cached.
    pub async fn resolve_owner(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        if let Some(username) = self.owners.get(user_id).await {
            return Ok(Some(username));
        }

        let username = self.storage.find_username(user_id).await?;
        if let Some(username) = &username {
            self.owners
                .insert(user_id.to_string(), username.clone())
                .await;
        }
        Ok(username)
    }

    /// Validate the bearer token and resolve its owner
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<OwnerIdentity, AuthError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim())
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.validate(token)?;
        self.resolve_owner(&claims.id)
            .await?
            .map(OwnerIdentity)
            .ok_or(AuthError::UnknownUser(claims.id))
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.authenticate(&headers).await {
        Ok(owner) => {
            request.extensions_mut().insert(owner);
            next.run(request).await
        }
        Err(e) => {
            match &e {
                AuthError::Lookup(_) => warn!("Authentication failed: {}", e),
                _ => debug!("Authentication failed: {}", e),
            }
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "message": "Unauthorized" })),
            )
                .into_response()
        }
    }
}
