//! GitHub adapter errors.

use dormancy::ProviderError;
use thiserror::Error;

const PROVIDER: &str = "github";

/// The GitHub quota bucket a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitResource {
    /// REST API quota.
    Core,
    /// GraphQL API quota.
    GraphQl,
}

impl RateLimitResource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::GraphQl => "graphql",
        }
    }
}

impl std::fmt::Display for RateLimitResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub {resource} rate limit exceeded")]
    RateLimited { resource: RateLimitResource },

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("GitHub GraphQL error: {message}")]
    GraphQl { message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected GitHub response: {message}")]
    InvalidResponse { message: String },
}

impl GitHubError {
    /// The exhausted quota bucket, if this is a rate-limit error.
    pub fn rate_limited_resource(&self) -> Option<RateLimitResource> {
        match self {
            Self::RateLimited { resource } => Some(*resource),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl std::fmt::Display) -> Self {
        Self::InvalidResponse {
            message: message.to_string(),
        }
    }
}

impl From<GitHubError> for ProviderError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::RateLimited { resource } => ProviderError::RateLimited {
                provider: PROVIDER,
                resource: resource.to_string(),
            },
            GitHubError::InvalidResponse { message } => ProviderError::InvalidResponse {
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
