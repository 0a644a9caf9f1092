//! Raw GitHub REST and GraphQL requests.
//!
//! The transport turns HTTP responses into typed values or a [`GitHubError`].
//! It recognizes rate limiting so that [`crate::PaginatedApiClient`] can
//! recover from it, but never retries anything itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{GitHubError, RateLimitResource};
use crate::paginated::RateLimitProbe;

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Authenticated HTTP access to one GitHub API host.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitBucket,
    graphql: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
struct RateLimitBucket {
    reset: i64,
}

impl Transport {
    /// Creates a transport for api.github.com.
    pub fn new(token: &str) -> Result<Self, GitHubError> {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    /// Creates a transport for another API host (GitHub Enterprise, test servers).
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("dormant-users/1.0"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET {path}` decoded as JSON.
    pub async fn rest_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitHubError> {
        let response = self
            .http
            .get(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;
        let response = check_status(response, RateLimitResource::Core).await?;
        response.json().await.map_err(GitHubError::invalid)
    }

    /// `DELETE {path}`. Returns the success status, or `None` for 404.
    pub async fn rest_delete(&self, path: &str) -> Result<Option<StatusCode>, GitHubError> {
        let response = self
            .http
            .delete(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, RateLimitResource::Core).await?;
        Ok(Some(response.status()))
    }

    /// Executes a GraphQL query and returns its `data`.
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, GitHubError> {
        let response = self
            .http
            .post(self.url("/graphql"))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let response = check_status(response, RateLimitResource::GraphQl).await?;
        let body: GraphQlResponse<T> = response.json().await.map_err(GitHubError::invalid)?;

        if body
            .errors
            .iter()
            .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
        {
            return Err(GitHubError::RateLimited {
                resource: RateLimitResource::GraphQl,
            });
        }
        if !body.errors.is_empty() {
            let message = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GitHubError::GraphQl { message });
        }
        body.data
            .ok_or_else(|| GitHubError::invalid("GraphQL response has no data"))
    }
}

/// Maps non-success statuses to errors, recognizing rate limits.
async fn check_status(
    response: Response,
    resource: RateLimitResource,
) -> Result<Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if is_rate_limited(status, response.headers()) {
        debug!(%status, %resource, "Request was rate limited");
        return Err(GitHubError::RateLimited { resource });
    }
    let message = response.text().await.unwrap_or_default();
    Err(GitHubError::Api {
        status: status.as_u16(),
        message,
    })
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => {
            headers
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0")
                || headers.contains_key("retry-after")
        }
        _ => false,
    }
}

#[async_trait]
impl RateLimitProbe for Transport {
    #[instrument(skip(self))]
    async fn reset_at(&self, resource: RateLimitResource) -> Result<DateTime<Utc>, GitHubError> {
        let limits: RateLimitResponse = self.rest_get("/rate_limit").await?;
        let bucket = match resource {
            RateLimitResource::Core => limits.resources.core,
            RateLimitResource::GraphQl => limits.resources.graphql,
        };
        DateTime::from_timestamp(bucket.reset, 0)
            .ok_or_else(|| GitHubError::invalid(format!("reset {} out of range", bucket.reset)))
    }
}
