//! Auth0 infrastructure adapter.
//!
//! Implements [`dormancy::IdentityProvider`]: the set of users whose last
//! Auth0 login is recent. The Auth0 `nickname` is the user's GitHub login.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Client-credentials authentication, paging through the
//! Management API user list, and timestamp parsing live here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dormancy::{IdentityProvider, ProviderError, UsernameSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const PROVIDER: &str = "auth0";
const PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum Auth0Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Auth0 API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Auth0 rate limit exceeded")]
    RateLimited,

    #[error("Unexpected Auth0 response: {0}")]
    InvalidResponse(String),
}

impl From<Auth0Error> for ProviderError {
    fn from(err: Auth0Error) -> Self {
        match err {
            Auth0Error::RateLimited => ProviderError::RateLimited {
                provider: PROVIDER,
                resource: "management-api".to_string(),
            },
            Auth0Error::InvalidResponse(message) => ProviderError::InvalidResponse {
                provider: PROVIDER,
                message,
            },
            other => ProviderError::Request {
                provider: PROVIDER,
                message: other.to_string(),
            },
        }
    }
}

/// Client-credentials application registered in the tenant.
#[derive(Clone)]
pub struct Auth0Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Auth0Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth0Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct User {
    nickname: Option<String>,
    last_login: Option<DateTime<Utc>>,
}

/// Auth0 Management API client for one tenant.
#[derive(Debug, Clone)]
pub struct Auth0Client {
    http: reqwest::Client,
    base_url: String,
    audience: String,
    credentials: Auth0Credentials,
    page_delay: Duration,
}

impl Auth0Client {
    /// Client for the tenant at `domain` (for example `example.eu.auth0.com`).
    pub fn new(domain: &str, credentials: Auth0Credentials) -> Result<Self, Auth0Error> {
        Self::with_base_url(&format!("https://{domain}"), credentials)
    }

    /// Client for a tenant served from `base_url`.
    pub fn with_base_url(base_url: &str, credentials: Auth0Credentials) -> Result<Self, Auth0Error> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent("dormant-users/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            audience: format!("{base_url}/api/v2/"),
            base_url,
            credentials,
            page_delay: DEFAULT_PAGE_DELAY,
        })
    }

    /// Pause between user pages.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, Auth0Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Auth0Error::RateLimited);
        }
        Err(Auth0Error::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn access_token(&self) -> Result<String, Auth0Error> {
        let request = TokenRequest {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            audience: &self.audience,
            grant_type: "client_credentials",
        };
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .json(&request)
            .send()
            .await?;
        let token: TokenResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Auth0Error::InvalidResponse(e.to_string()))?;
        debug!("Access token received");
        Ok(token.access_token)
    }

    async fn users_page(&self, token: &str, page: usize) -> Result<Vec<User>, Auth0Error> {
        let response = self
            .http
            .get(format!("{}/api/v2/users", self.base_url))
            .query(&[("page", page), ("per_page", PAGE_SIZE)])
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Auth0Error::InvalidResponse(e.to_string()))
    }

    /// Every user in the tenant, page by page until a short page.
    async fn all_users(&self) -> Result<Vec<User>, Auth0Error> {
        let token = self.access_token().await?;
        let mut users = Vec::new();
        for page in 0.. {
            let batch = self.users_page(&token, page).await?;
            let last = batch.len() < PAGE_SIZE;
            users.extend(batch);
            if last {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }
        Ok(users)
    }
}

#[async_trait]
impl IdentityProvider for Auth0Client {
    #[instrument(skip(self))]
    async fn active_usernames_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<UsernameSet, ProviderError> {
        let users = self.all_users().await?;
        let total = users.len();
        let active: UsernameSet = users
            .into_iter()
            .filter(|user| user.last_login.is_some_and(|at| at > since))
            .filter_map(|user| {
                let nickname = user.nickname;
                if nickname.is_none() {
                    warn!("Recently active Auth0 user has no nickname");
                }
                nickname
            })
            .filter_map(dormancy::Username::new)
            .collect();
        info!(total, active = active.len(), "Fetched Auth0 users");
        Ok(active)
    }
}
