//! [`OrgDirectory`] implementation for one GitHub organization.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dormancy::{
    Clock, EmailAddress, OrgDirectory, OrganizationName, ProviderError, Sleeper, Username,
    UsernameSet,
};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::GitHubError;
use crate::paginated::{Page, PageInfo, PaginatedApiClient};
use crate::transport::Transport;

const PAGE_SIZE: usize = 100;

const MEMBERS_QUERY: &str = r#"
query($org: String!, $first: Int!, $after: String) {
  organization(login: $org) {
    membersWithRole(first: $first, after: $after) {
      nodes { login }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const VERIFIED_EMAIL_QUERY: &str = r#"
query($org: String!, $login: String!) {
  user(login: $login) {
    organizationVerifiedDomainEmails(login: $org)
  }
}"#;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MembersData {
    organization: Option<MembersOrganization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersOrganization {
    members_with_role: MemberConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberConnection {
    nodes: Vec<Login>,
    page_info: WirePageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct VerifiedEmailData {
    user: Option<VerifiedEmailUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedEmailUser {
    #[serde(default)]
    organization_verified_domain_emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuditLogEntry {
    #[serde(rename = "@timestamp")]
    timestamp: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GitHub access scoped to one organization.
pub struct GitHubClient {
    organization: OrganizationName,
    transport: Transport,
    api: PaginatedApiClient,
}

impl GitHubClient {
    pub fn new(organization: OrganizationName, transport: Transport, api: PaginatedApiClient) -> Self {
        Self {
            organization,
            transport,
            api,
        }
    }

    /// Builds a client whose rate-limit probe is the transport itself.
    pub fn from_transport(
        organization: OrganizationName,
        transport: Transport,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let api = PaginatedApiClient::new(Arc::new(transport.clone()), sleeper, clock);
        Self::new(organization, transport, api)
    }

    /// Replaces the call wrapper, for example to change the rate-limit buffer.
    pub fn with_api(mut self, api: PaginatedApiClient) -> Self {
        self.api = api;
        self
    }

    pub fn organization(&self) -> &OrganizationName {
        &self.organization
    }

    async fn members_page(&self, cursor: Option<String>) -> Result<Page<String>, GitHubError> {
        let data: MembersData = self
            .transport
            .graphql(
                MEMBERS_QUERY,
                serde_json::json!({
                    "org": self.organization.as_str(),
                    "first": PAGE_SIZE,
                    "after": cursor,
                }),
            )
            .await?;
        let connection = data
            .organization
            .ok_or_else(|| {
                GitHubError::invalid(format!("organization '{}' not found", self.organization))
            })?
            .members_with_role;
        Ok(Page {
            items: connection.nodes.into_iter().map(|n| n.login).collect(),
            page_info: PageInfo {
                has_next_page: connection.page_info.has_next_page,
                end_cursor: connection.page_info.end_cursor,
            },
        })
    }

    /// REST listings are numbered pages; the page number doubles as cursor.
    async fn outside_collaborators_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<String>, GitHubError> {
        let page: usize = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| GitHubError::invalid(format!("bad page cursor '{raw}'")))?,
            None => 1,
        };
        let path = format!(
            "/orgs/{}/outside_collaborators?per_page={PAGE_SIZE}&page={page}",
            self.organization
        );
        let users: Vec<Login> = self.transport.rest_get(&path).await?;
        let full = users.len() == PAGE_SIZE;
        Ok(Page {
            items: users.into_iter().map(|u| u.login).collect(),
            page_info: PageInfo {
                has_next_page: full,
                end_cursor: full.then(|| (page + 1).to_string()),
            },
        })
    }
}

#[async_trait]
impl OrgDirectory for GitHubClient {
    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn members(&self) -> Result<UsernameSet, ProviderError> {
        let logins = self
            .api
            .paginate_all(|cursor| self.members_page(cursor))
            .await?;
        let members = dormancy::username_set(logins);
        info!(count = members.len(), "Fetched organization members");
        Ok(members)
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn outside_collaborators(&self) -> Result<UsernameSet, ProviderError> {
        let logins = self
            .api
            .paginate_all(|cursor| self.outside_collaborators_page(cursor))
            .await?;
        let collaborators = dormancy::username_set(logins);
        info!(count = collaborators.len(), "Fetched outside collaborators");
        Ok(collaborators)
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn verified_email(&self, username: &Username) -> Result<EmailAddress, ProviderError> {
        let variables = serde_json::json!({
            "org": self.organization.as_str(),
            "login": username.as_str(),
        });
        let data: VerifiedEmailData = self
            .api
            .read(|| self.transport.graphql(VERIFIED_EMAIL_QUERY, variables.clone()))
            .await?;
        let first = data
            .user
            .and_then(|u| u.organization_verified_domain_emails.into_iter().next());
        Ok(EmailAddress::from_optional(first.as_deref()))
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn latest_audit_activity(
        &self,
        username: &Username,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let phrase = format!("actor:{username}");
        let path = format!(
            "/orgs/{}/audit-log?phrase={}&per_page=1",
            self.organization,
            urlencoding::encode(&phrase)
        );
        let entries: Vec<AuditLogEntry> = self.api.read(|| self.transport.rest_get(&path)).await?;
        let Some(newest) = entries.first() else {
            return Ok(None);
        };
        DateTime::from_timestamp_millis(newest.timestamp)
            .map(Some)
            .ok_or_else(|| {
                GitHubError::invalid(format!("audit log timestamp {} out of range", newest.timestamp))
                    .into()
            })
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn remove_member(&self, username: &Username) -> Result<(), ProviderError> {
        let path = format!("/orgs/{}/members/{username}", self.organization);
        let status = self
            .api
            .mutate_idempotent(|| self.transport.rest_delete(&path))
            .await?;
        match status {
            Some(status) => debug!(%status, "Member removed"),
            None => info!(%username, "User was already not a member"),
        }
        Ok(())
    }
}
