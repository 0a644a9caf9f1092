//! Shared value types and records for the dormant-user workflow.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the data that flows between the lifecycle phases, including the one record
//! type that is persisted between process invocations ([`EmailedUserRecord`]).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Username;

// ---------------------------------------------------------------------------
// Email addresses
// ---------------------------------------------------------------------------

/// Stored in place of an address when GitHub has no verified domain email.
pub const MISSING_EMAIL_ADDRESS: &str = "-";

/// The email address of an organization member, or the missing sentinel.
///
/// Serialized as a plain string so the persisted state stays readable;
/// [`MISSING_EMAIL_ADDRESS`] round-trips to [`EmailAddress::Missing`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmailAddress {
    /// An organization-verified address, lower-cased.
    Verified(String),
    /// No verified address could be resolved for the user.
    Missing,
}

impl EmailAddress {
    /// Builds an address from an optional raw value. Empty values and the
    /// sentinel itself map to [`EmailAddress::Missing`].
    pub fn from_optional(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() && v != MISSING_EMAIL_ADDRESS => {
                Self::Verified(v.to_lowercase())
            }
            _ => Self::Missing,
        }
    }

    /// Returns the address when one is known.
    pub fn as_deliverable(&self) -> Option<&str> {
        match self {
            Self::Verified(address) => Some(address),
            Self::Missing => None,
        }
    }

    /// Returns `true` for the missing sentinel.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified(address) => write!(f, "{address}"),
            Self::Missing => write!(f, "{MISSING_EMAIL_ADDRESS}"),
        }
    }
}

impl Serialize for EmailAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EmailAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::from_optional(raw.as_deref()))
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Calendar date shown to users as the deadline to log in before removal.
///
/// Persisted and rendered as `dd/mm/YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoginDate(NaiveDate);

impl LoginDate {
    const FORMAT: &'static str = "%d/%m/%Y";

    /// Wraps a calendar date.
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Returns the underlying date.
    pub fn as_date(self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for LoginDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl Serialize for LoginDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LoginDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, Self::FORMAT)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the externally produced dormant-user export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DormantCandidateRecord {
    /// The candidate's login.
    pub username: Username,
    /// Whether the export flagged the user as an outside collaborator.
    pub is_outside_collaborator: bool,
}

/// A user that phase 1 notified and that is therefore in flight.
///
/// The persisted list of these records is the workflow's only durable state:
/// its usernames are exactly the users between notify and remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailedUserRecord {
    /// Address the notices were (or would have been) sent to.
    pub email_address: EmailAddress,
    /// The in-flight user.
    pub username: Username,
    /// Deadline communicated in the first notice and reused by the reminder.
    pub login_date: LoginDate,
    /// Always `false` for records produced by phase 1; carried for
    /// compatibility with the stored format.
    #[serde(default)]
    pub is_outside_collaborator: bool,
}

/// A failed email reported by the email provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndeliveredEmail {
    /// Recipient address as reported by the provider.
    pub email_address: String,
    /// When the provider created the notification.
    pub created_at: DateTime<Utc>,
    /// Provider delivery status (e.g. `"permanent-failure"`).
    pub status: String,
}

// ---------------------------------------------------------------------------
// Email templates
// ---------------------------------------------------------------------------

/// Email provider template identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    /// Creates a template identifier, returning `None` if the value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Template placeholders, keyed by placeholder name.
pub type Personalisation = BTreeMap<String, String>;
