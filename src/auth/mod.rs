//! Bearer-credential verification. The identity provider is a seam: local
//! tokens for self-hosted use, or a remote user endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{IdentityMode, Secret, Settings};
use crate::date_util::now_millis;
use crate::error::{Error, Result};
use crate::storage::repository::{self, ApiToken};
use crate::storage::Database;

const TOKEN_PREFIX: &str = "hp_";

/// The caller a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Pull the token out of an `Authorization` header value.
///
/// A missing or blank header is "No authorization header"; anything that is
/// not `Bearer <token>` is "Invalid token".
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(Error::missing_credentials)?;
    let (scheme, token) = header.split_once(' ').ok_or_else(Error::invalid_token)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(Error::invalid_token());
    }
    Ok(token)
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to an identity, or fail with
    /// `Unauthenticated("Invalid token")`.
    async fn verify(&self, token: &str) -> Result<Identity>;
}

// ── Local tokens ───────────────────────────────────────────────────

pub struct LocalTokenProvider {
    db: Database,
}

impl LocalTokenProvider {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityProvider for LocalTokenProvider {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let token = token.to_string();
        let user_id = self
            .db
            .reader()
            .call(move |conn| repository::find_token_user(conn, &token))
            .await?;
        match user_id {
            Some(user_id) => Ok(Identity {
                user_id,
                email: None,
            }),
            None => {
                log::debug!("Rejected unknown or revoked token");
                Err(Error::invalid_token())
            }
        }
    }
}

/// Create a token for `user_id`.
pub async fn issue_token(db: &Database, user_id: &str, label: Option<&str>) -> Result<ApiToken> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(Error::Validation("user id must not be empty".into()));
    }
    let token = ApiToken {
        token: format!("{TOKEN_PREFIX}{}", uuid::Uuid::new_v4().simple()),
        user_id: user_id.to_string(),
        label: label.map(str::to_string),
        created_at: now_millis(),
        revoked_at: None,
    };
    db.writer()
        .call({
            let token = token.clone();
            move |conn| repository::insert_api_token(conn, &token)
        })
        .await?;
    log::info!("Issued token for user {}", token.user_id);
    Ok(token)
}

/// Revoke a token. Returns false when it was unknown or already revoked.
pub async fn revoke_token(db: &Database, token: &str) -> Result<bool> {
    let token = token.to_string();
    let at = now_millis();
    let revoked = db
        .writer()
        .call(move |conn| repository::revoke_api_token(conn, &token, &at))
        .await?;
    Ok(revoked)
}

// ── Remote user endpoint ───────────────────────────────────────────

#[derive(Deserialize)]
struct UserResponse {
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

pub struct HttpIdentityProvider {
    http: reqwest::Client,
    url: url::Url,
    api_key: Option<Secret>,
}

impl HttpIdentityProvider {
    pub fn new(url: url::Url, api_key: Option<Secret>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http, url, api_key })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let mut request = self.http.get(self.url.clone()).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key.expose());
        }

        let response = request.send().await.map_err(|e| {
            log::warn!("Identity endpoint unreachable: {e}");
            Error::invalid_token()
        })?;
        if !response.status().is_success() {
            log::debug!("Identity endpoint rejected token: {}", response.status());
            return Err(Error::invalid_token());
        }

        let user: UserResponse = response.json().await.map_err(|e| {
            log::warn!("Unexpected identity response: {e}");
            Error::invalid_token()
        })?;
        match user.id.filter(|id| !id.is_empty()) {
            Some(user_id) => Ok(Identity {
                user_id,
                email: user.email,
            }),
            None => Err(Error::invalid_token()),
        }
    }
}

/// Build the provider selected by `identity_provider`.
pub fn create_provider(settings: &Settings, db: Database) -> Result<Arc<dyn IdentityProvider>> {
    match settings.identity {
        IdentityMode::Local => Ok(Arc::new(LocalTokenProvider::new(db))),
        IdentityMode::Http => {
            let url = settings
                .identity_url
                .clone()
                .ok_or_else(|| Error::Config("identity_url is not set".into()))?;
            Ok(Arc::new(HttpIdentityProvider::new(
                url,
                settings.identity_api_key.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer  abc ")).unwrap(), "abc");

        let missing = bearer_token(None).unwrap_err();
        assert_eq!(missing.to_string(), "No authorization header");
        assert_eq!(bearer_token(Some("  ")).unwrap_err().to_string(), "No authorization header");

        for bad in ["abc", "Basic abc", "Bearer "] {
            assert_eq!(bearer_token(Some(bad)).unwrap_err().to_string(), "Invalid token");
        }
    }

    #[tokio::test]
    async fn test_local_token_lifecycle() {
        let db = Database::open_memory().await.unwrap();
        let provider = LocalTokenProvider::new(db.clone());

        let issued = issue_token(&db, "user-1", Some("phone")).await.unwrap();
        assert!(issued.token.starts_with("hp_"));

        let identity = provider.verify(&issued.token).await.unwrap();
        assert_eq!(identity.user_id, "user-1");

        assert!(revoke_token(&db, &issued.token).await.unwrap());
        assert!(!revoke_token(&db, &issued.token).await.unwrap());
        let err = provider.verify(&issued.token).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(ref m) if m == "Invalid token"));
    }

    #[tokio::test]
    async fn test_unknown_local_token_rejected() {
        let db = Database::open_memory().await.unwrap();
        let provider = LocalTokenProvider::new(db);
        assert!(matches!(
            provider.verify("hp_nope").await,
            Err(Error::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_issue_token_requires_user() {
        let db = Database::open_memory().await.unwrap();
        assert!(matches!(
            issue_token(&db, " ", None).await,
            Err(Error::Validation(_))
        ));
    }

    async fn user_endpoint(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let apikey = headers.get("apikey").and_then(|v| v.to_str().ok());
        match (auth, apikey) {
            ("Bearer good", Some("anon")) => (
                StatusCode::OK,
                Json(serde_json::json!({"id": "remote-user", "email": "a@example.com"})),
            ),
            ("Bearer noid", Some("anon")) => (StatusCode::OK, Json(serde_json::json!({}))),
            _ => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"msg": "bad jwt"})),
            ),
        }
    }

    async fn spawn_user_endpoint() -> url::Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/auth/v1/user", get(user_endpoint));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url::Url::parse(&format!("http://{addr}/auth/v1/user")).unwrap()
    }

    #[tokio::test]
    async fn test_http_provider() {
        let url = spawn_user_endpoint().await;
        let provider = HttpIdentityProvider::new(url, Some(Secret::new("anon"))).unwrap();

        let identity = provider.verify("good").await.unwrap();
        assert_eq!(identity.user_id, "remote-user");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));

        for token in ["bad", "noid"] {
            let err = provider.verify(token).await.unwrap_err();
            assert_eq!(err.to_string(), "Invalid token");
        }
    }
}
