//! Slack operator alerts via `chat.postMessage`.

use async_trait::async_trait;
use dormancy::{OperatorAlerts, OrganizationName, ProviderError, UsernameSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::NotifyError;

pub const SLACK_API_URL: &str = "https://slack.com/api";

/// The operations engineering alerts channel.
pub const DEFAULT_ALERTS_CHANNEL: &str = "C033QBE511V";

const SERVICE: &str = "slack";
const HEADING: &str = "*Dormant Users Automation*";

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: Vec<Block<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block<'a> {
    Section { text: Text<'a> },
}

#[derive(Debug, Serialize)]
struct Text<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts operator alerts to one Slack channel.
#[derive(Debug, Clone)]
pub struct SlackAlerts {
    http: reqwest::Client,
    base_url: String,
    token: String,
    channel: String,
}

impl SlackAlerts {
    pub fn new(token: &str, channel: &str) -> Result<Self, NotifyError> {
        Self::with_base_url(token, channel, SLACK_API_URL)
    }

    pub fn with_base_url(token: &str, channel: &str, base_url: &str) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .user_agent("dormant-users/1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            channel: channel.to_string(),
        })
    }

    /// Posts a markdown message.
    #[instrument(skip(self, message), fields(channel = %self.channel))]
    pub async fn post(&self, message: &str) -> Result<(), NotifyError> {
        let payload = PostMessage {
            channel: &self.channel,
            text: message,
            blocks: vec![Block::Section {
                text: Text {
                    kind: "mrkdwn",
                    text: message,
                },
            }],
        };
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::RateLimited { service: SERVICE });
        }
        if !status.is_success() {
            return Err(NotifyError::Api {
                service: SERVICE,
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let body: PostMessageResponse =
            response
                .json()
                .await
                .map_err(|e| NotifyError::InvalidResponse {
                    service: SERVICE,
                    message: e.to_string(),
                })?;
        if !body.ok {
            return Err(NotifyError::Slack(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        debug!("Slack message posted");
        Ok(())
    }
}

pub(crate) fn unknown_allow_list_message(users: &UsernameSet) -> String {
    let list = users
        .iter()
        .map(|u| u.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{HEADING}\n\nRemove these users from the Dormant Users allow list:\n{list}")
}

pub(crate) fn undelivered_message(organization: &OrganizationName, addresses: &[String]) -> String {
    format!(
        "{HEADING}\n\nUndelivered emails for {organization} GitHub Organisation:\n{}\n\nRemove these users manually.",
        addresses.join(", ")
    )
}

pub(crate) fn removed_message(organization: &OrganizationName, count: usize) -> String {
    format!("{HEADING}\n\nRemoved {count} users from the {organization} GitHub Organisation.")
}

#[async_trait]
impl OperatorAlerts for SlackAlerts {
    async fn unknown_allow_list_users(&self, users: &UsernameSet) -> Result<(), ProviderError> {
        Ok(self.post(&unknown_allow_list_message(users)).await?)
    }

    async fn undelivered_emails(
        &self,
        organization: &OrganizationName,
        addresses: &[String],
    ) -> Result<(), ProviderError> {
        Ok(self.post(&undelivered_message(organization, addresses)).await?)
    }

    async fn users_removed(
        &self,
        organization: &OrganizationName,
        count: usize,
    ) -> Result<(), ProviderError> {
        Ok(self.post(&removed_message(organization, count)).await?)
    }
}
