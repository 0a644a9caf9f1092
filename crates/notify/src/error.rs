//! Error types for the messaging adapters.

use dormancy::ProviderError;
use thiserror::Error;

/// Errors that can occur when sending emails or operator alerts.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API key does not have the `name-<service id>-<secret>` shape.
    #[error("Invalid GOV.UK Notify API key: {0}")]
    InvalidApiKey(String),

    /// Signing the request token failed.
    #[error("Failed to sign Notify token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// The service answered with an error status.
    #[error("{service} API error: {status} - {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Rate limited by the service
    #[error("{service} rate limit exceeded")]
    RateLimited { service: &'static str },

    /// Slack accepted the request but reported `ok: false`.
    #[error("Slack rejected the message: {0}")]
    Slack(String),

    /// The response body could not be decoded.
    #[error("Unexpected {service} response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl NotifyError {
    fn provider(&self) -> &'static str {
        match self {
            Self::Api { service, .. }
            | Self::RateLimited { service }
            | Self::InvalidResponse { service, .. } => service,
            Self::Slack(_) => "slack",
            Self::Http(_) | Self::InvalidApiKey(_) | Self::Token(_) => "notify",
        }
    }
}

impl From<NotifyError> for ProviderError {
    fn from(err: NotifyError) -> Self {
        let provider = err.provider();
        match err {
            NotifyError::RateLimited { .. } => ProviderError::RateLimited {
                provider,
                resource: "api".to_string(),
            },
            NotifyError::InvalidResponse { message, .. } => {
                ProviderError::InvalidResponse { provider, message }
            }
            other => ProviderError::Request {
                provider,
                message: other.to_string(),
            },
        }
    }
}
