//! Port traits implemented by the infrastructure crates.
//!
//! | Trait | Implemented by | Used for |
//! |-------|----------------|----------|
//! | [`OrgDirectory`] | `github` | members, collaborators, emails, audit log, removal |
//! | [`IdentityProvider`] | `auth0` | recent logins |
//! | [`EmailNotifier`] | `notify` | first notice, reminder, removal emails, bounces |
//! | [`OperatorAlerts`] | `notify` | operations-team chat messages |
//! | [`ObjectStore`] | `store` | in-flight list and the two exports |
//! | [`Clock`], [`Sleeper`] | `github` / tests | time and blocking waits |
//!
//! Every method is awaited sequentially by the workflow; none of the
//! implementations need to be safe for concurrent use on the same
//! organization, only `Send + Sync` so they can sit behind an `Arc`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    EmailAddress, OrganizationName, Personalisation, ProviderError, StoreError, TemplateId,
    UndeliveredEmail, Username, UsernameSet,
};

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// Read and mutate one GitHub organization.
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// All current organization members.
    async fn members(&self) -> Result<UsernameSet, ProviderError>;

    /// All outside collaborators of the organization.
    async fn outside_collaborators(&self) -> Result<UsernameSet, ProviderError>;

    /// The first organization-verified domain email of `username`, if any.
    async fn verified_email(&self, username: &Username) -> Result<EmailAddress, ProviderError>;

    /// Timestamp of the newest audit-log entry whose actor is `username`.
    async fn latest_audit_activity(
        &self,
        username: &Username,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;

    /// Removes `username` from the organization.
    ///
    /// Must succeed when the user is already absent.
    async fn remove_member(&self, username: &Username) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

/// The identity provider's view of recent logins.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Usernames whose last login is newer than `since`.
    async fn active_usernames_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<UsernameSet, ProviderError>;
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// Transactional email provider.
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    /// Sends one templated email.
    async fn send_email(
        &self,
        template: &TemplateId,
        address: &str,
        personalisation: &Personalisation,
    ) -> Result<(), ProviderError>;

    /// Failed email notifications that used `template`.
    async fn failed_notifications(
        &self,
        template: &TemplateId,
    ) -> Result<Vec<UndeliveredEmail>, ProviderError>;
}

/// Messages to the operations team.
#[async_trait]
pub trait OperatorAlerts: Send + Sync {
    /// Allow-list entries that are no longer organization members.
    async fn unknown_allow_list_users(&self, users: &UsernameSet) -> Result<(), ProviderError>;

    /// First-notice emails that bounced.
    async fn undelivered_emails(
        &self,
        organization: &OrganizationName,
        addresses: &[String],
    ) -> Result<(), ProviderError>;

    /// Number of users removed by phase 3.
    async fn users_removed(
        &self,
        organization: &OrganizationName,
        count: usize,
    ) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// Opaque version token of a stored object (an ETag or content digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectVersion(String);

impl ObjectVersion {
    /// Wraps a store-specific version token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object's bytes together with the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedObject {
    /// Object contents.
    pub bytes: Vec<u8>,
    /// Version of the contents.
    pub version: ObjectVersion,
}

/// Condition a write or delete must satisfy to take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional.
    None,
    /// The object must not exist yet.
    MustNotExist,
    /// The object must currently be at this version.
    MatchVersion(ObjectVersion),
}

impl Precondition {
    /// The precondition that reproduces an earlier observation: absent stays
    /// absent, a known version must still be current.
    pub fn observed(version: Option<ObjectVersion>) -> Self {
        match version {
            Some(version) => Self::MatchVersion(version),
            None => Self::MustNotExist,
        }
    }
}

/// Durable keyed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object. A missing object is a
    /// [`crate::StoreErrorCode::NotFound`] error, never an empty value.
    async fn get(&self, key: &str) -> Result<VersionedObject, StoreError>;

    /// The current version of an object, or `None` when it does not exist.
    async fn version(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError>;

    /// Writes an object if `precondition` holds, returning the new version.
    /// A failed precondition is a [`crate::StoreErrorCode::Conflict`] error.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<ObjectVersion, StoreError>;

    /// Deletes an object if `precondition` holds. Deleting an absent object
    /// with [`Precondition::None`] succeeds.
    async fn delete(&self, key: &str, precondition: Precondition) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Blocks the calling task for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for `duration`. There is no cancellation path.
    async fn sleep(&self, duration: Duration);
}
