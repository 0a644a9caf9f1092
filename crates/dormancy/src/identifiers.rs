//! Newtype domain identifiers.
//!
//! GitHub logins and organization names are case-insensitive, so both are
//! normalized to lower case inside their constructors (and when deserialized).
//! Every set built from these types therefore compares normalized values and
//! no call site has to remember to lower-case anything.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for lower-cased String newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display,
// TryFrom<String> (used by serde so stored values are normalized too).
// ---------------------------------------------------------------------------
macro_rules! lowercase_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// after trimming. The stored value is lower-cased.
            pub fn new(value: impl AsRef<str>) -> Option<Self> {
                let v = value.as_ref().trim();
                if v.is_empty() {
                    None
                } else {
                    Some(Self(v.to_lowercase()))
                }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
                    .ok_or_else(|| format!("{} must not be empty", stringify!($name)))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

lowercase_id! {
    /// A GitHub login. The identity key of every signal and record.
    Username
}

lowercase_id! {
    /// A GitHub organization login (e.g. `"ministryofjustice"`).
    ///
    /// Keys the per-organization configuration and the persisted state object.
    OrganizationName
}

impl OrganizationName {
    /// Builds an organization name from a compile-time constant.
    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.trim().to_lowercase())
    }
}

/// A sorted set of normalized usernames.
///
/// Ordered so that classification output and operator reports are stable.
pub type UsernameSet = BTreeSet<Username>;

/// Builds a [`UsernameSet`] from raw logins, silently dropping empty values.
pub fn username_set<I, S>(logins: I) -> UsernameSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    logins.into_iter().filter_map(Username::new).collect()
}

// ---------------------------------------------------------------------------

/// Identifies one process invocation.
///
/// Generated fresh for every CLI run and attached to the phase spans so all
/// activity of a single run can be correlated in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
