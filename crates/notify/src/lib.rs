//! Messaging infrastructure adapters.
//!
//! Implements [`dormancy::EmailNotifier`] for GOV.UK Notify and
//! [`dormancy::OperatorAlerts`] for Slack.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request signing, and response
//! parsing live here. The [`dormancy`] crate sees only the two port traits.
//! Message wording for operator alerts lives in [`slack`]; email wording lives
//! in the Notify templates referenced by the organization's configuration.

pub mod error;
pub mod govuk;
pub mod slack;

pub use error::NotifyError;
pub use govuk::{NotifyApiKey, NotifyClient, NOTIFY_API_URL};
pub use slack::{SlackAlerts, DEFAULT_ALERTS_CHANNEL, SLACK_API_URL};
