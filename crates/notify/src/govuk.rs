//! GOV.UK Notify email client.
//!
//! Requests are authenticated with a short-lived HS256 token signed with the
//! secret half of the API key; `iss` is the service id and `iat` the current
//! time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dormancy::{EmailNotifier, Personalisation, ProviderError, TemplateId, UndeliveredEmail};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::NotifyError;

pub const NOTIFY_API_URL: &str = "https://api.notifications.service.gov.uk";

const SERVICE: &str = "notify";
const UUID_LEN: usize = 36;

/// A parsed `name-<service id>-<secret>` API key.
#[derive(Clone)]
pub struct NotifyApiKey {
    service_id: String,
    secret: String,
}

impl std::fmt::Debug for NotifyApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyApiKey")
            .field("service_id", &self.service_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl NotifyApiKey {
    /// Splits an API key into its service id and secret. Both are the
    /// trailing 36-character UUIDs of the key.
    pub fn parse(raw: &str) -> Result<Self, NotifyError> {
        let raw = raw.trim();
        let invalid = || NotifyError::InvalidApiKey("expected name-<service id>-<secret>".into());
        if !raw.is_ascii() || raw.len() < 2 * UUID_LEN + 2 {
            return Err(invalid());
        }
        let secret_start = raw.len() - UUID_LEN;
        let service_start = secret_start - 1 - UUID_LEN;
        let separators = [service_start - 1, secret_start - 1];
        if separators.iter().any(|&i| raw.as_bytes()[i] != b'-') {
            return Err(invalid());
        }
        let key = Self {
            service_id: raw[service_start..secret_start - 1].to_string(),
            secret: raw[secret_start..].to_string(),
        };
        if !looks_like_uuid(&key.service_id) || !looks_like_uuid(&key.secret) {
            return Err(invalid());
        }
        Ok(key)
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Signs a request token issued at `now`.
    pub fn token(&self, now: DateTime<Utc>) -> Result<String, NotifyError> {
        #[derive(Debug, Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            iat: i64,
        }

        let claims = Claims {
            iss: &self.service_id,
            iat: now.timestamp(),
        };
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &key,
        )?)
    }
}

fn looks_like_uuid(value: &str) -> bool {
    value.len() == UUID_LEN
        && value
            .chars()
            .enumerate()
            .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-') && (c == '-' || c.is_ascii_hexdigit()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    email_address: &'a str,
    template_id: &'a str,
    personalisation: &'a Personalisation,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_reply_to_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct NotificationList {
    notifications: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
struct Notification {
    email_address: Option<String>,
    created_at: DateTime<Utc>,
    status: String,
    template: NotificationTemplate,
}

#[derive(Debug, Deserialize)]
struct NotificationTemplate {
    id: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GOV.UK Notify [`EmailNotifier`].
#[derive(Debug, Clone)]
pub struct NotifyClient {
    http: reqwest::Client,
    base_url: String,
    key: NotifyApiKey,
    reply_to_id: Option<String>,
}

impl NotifyClient {
    pub fn new(api_key: &str, reply_to_id: Option<String>) -> Result<Self, NotifyError> {
        Self::with_base_url(api_key, reply_to_id, NOTIFY_API_URL)
    }

    pub fn with_base_url(
        api_key: &str,
        reply_to_id: Option<String>,
        base_url: &str,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .user_agent("dormant-users/1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: NotifyApiKey::parse(api_key)?,
            reply_to_id,
        })
    }

    fn bearer(&self) -> Result<String, NotifyError> {
        Ok(format!("Bearer {}", self.key.token(Utc::now())?))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, NotifyError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::RateLimited { service: SERVICE });
        }
        let message = response.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            service: SERVICE,
            status: status.as_u16(),
            message,
        })
    }

    /// Sends one templated email.
    #[instrument(skip(self, address, personalisation), fields(template = %template))]
    pub async fn send(
        &self,
        template: &TemplateId,
        address: &str,
        personalisation: &Personalisation,
    ) -> Result<(), NotifyError> {
        let request = SendEmailRequest {
            email_address: address,
            template_id: template.as_str(),
            personalisation,
            email_reply_to_id: self.reply_to_id.as_deref(),
        };
        let response = self
            .http
            .post(format!("{}/v2/notifications/email", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .json(&request)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("Email accepted by Notify");
        Ok(())
    }

    /// Failed email notifications created from `template`.
    #[instrument(skip(self), fields(template = %template))]
    pub async fn failed(&self, template: &TemplateId) -> Result<Vec<UndeliveredEmail>, NotifyError> {
        let response = self
            .http
            .get(format!("{}/v2/notifications", self.base_url))
            .query(&[("status", "failed"), ("template_type", "email")])
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        let list: NotificationList = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| NotifyError::InvalidResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let failed: Vec<UndeliveredEmail> = list
            .notifications
            .into_iter()
            .filter(|n| n.template.id == template.as_str())
            .filter_map(|n| {
                Some(UndeliveredEmail {
                    email_address: n.email_address?,
                    created_at: n.created_at,
                    status: n.status,
                })
            })
            .collect();
        info!(count = failed.len(), "Fetched failed notifications");
        Ok(failed)
    }
}

#[async_trait]
impl EmailNotifier for NotifyClient {
    async fn send_email(
        &self,
        template: &TemplateId,
        address: &str,
        personalisation: &Personalisation,
    ) -> Result<(), ProviderError> {
        Ok(self.send(template, address, personalisation).await?)
    }

    async fn failed_notifications(
        &self,
        template: &TemplateId,
    ) -> Result<Vec<UndeliveredEmail>, ProviderError> {
        Ok(self.failed(template).await?)
    }
}
