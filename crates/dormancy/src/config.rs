//! Workflow configuration.
//!
//! Everything that varies by organization (allow-lists, whether the identity
//! provider is consulted, email templates) lives in an explicit
//! [`DormancyConfig`] that is handed to the classifier and orchestrator at
//! construction time. There are no process-wide lookups.
//!
//! The built-in configuration ([`DormancyConfig::builtin`]) covers the two
//! supported organizations; a TOML document with the same shape replaces it
//! entirely:
//!
//! ```toml
//! settle_delay_secs = 130
//!
//! [organizations.ministryofjustice]
//! allow_list = ["ci-hmcts", "jenkins-moj"]
//! consult_identity_provider = true
//! reply_to_id = "6767e190-996f-462c-b7f8-9bafe7b96a01"
//!
//! [organizations.ministryofjustice.templates]
//! first_notice = "30351e8f-320b-4ebe-b0bf-d6aa0a7c607d"
//! reminder = "7405b6f8-9355-4572-8b8c-c73bc8cdee3c"
//! removed = "d1698bc9-7176-4d54-bece-e68d03d5896a"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{username_set, DormancyError, OrganizationName, TemplateId, UsernameSet};

const MINISTRY_OF_JUSTICE: &str = "ministryofjustice";
const MOJ_ANALYTICAL_SERVICES: &str = "moj-analytical-services";
const OPERATIONS_ENGINEERING_REPLY_TO: &str = "6767e190-996f-462c-b7f8-9bafe7b96a01";

const MINISTRY_OF_JUSTICE_ALLOW_LIST: &[&str] = &[
    "ci-hmcts",
    "cloud-platform-dummy-user",
    "correspondence-tool-bot",
    "form-builder-developers",
    "gecko-moj",
    "hmpps-pcs-tooling",
    "jenkins-moj",
    "laa-machine",
    "mojplatformsdeploy",
    "opg-integrations",
    "opg-use-an-lpa",
    "opg-weblate",
    "slack-moj",
    "sonarqubebot",
    "moj-operations-engineering-bot",
    "operations-engineering-servicenow",
    "laa-service-account",
    "mojanalytics",
    "laaserviceaccount",
    "analytical-platform-bot",
    "hmppsdigitalserviceaccount",
    "hmpps-dso-pr-reviewer",
];

// ---------------------------------------------------------------------------

/// Email templates used by the three phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailTemplates {
    /// Phase 1 first notice; also the template checked for bounces.
    pub first_notice: TemplateId,
    /// Phase 2 reminder.
    pub reminder: TemplateId,
    /// Phase 3 removal confirmation.
    pub removed: TemplateId,
}

/// Per-organization policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationPolicy {
    /// Service accounts and bots that are never processed.
    #[serde(default)]
    pub allow_list: UsernameSet,

    /// Whether the identity provider's recent-login list is a signal for this
    /// organization. Only the organization that owns the identity provider
    /// enables this.
    #[serde(default)]
    pub consult_identity_provider: bool,

    /// Notify templates for this organization.
    pub templates: EmailTemplates,

    /// Reply-to address identifier attached to every email.
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

/// Top-level configuration for a dormant-user run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DormancyConfig {
    /// Wait after sending first notices before checking for bounces.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Added to the provider-reported rate-limit reset wait.
    #[serde(default = "default_rate_limit_buffer_secs")]
    pub rate_limit_buffer_secs: u64,

    /// Identity-provider logins newer than this many days count as active.
    #[serde(default = "default_identity_window_days")]
    pub identity_window_days: u32,

    /// Snapshot and audit-log activity newer than this many months counts as active.
    #[serde(default = "default_activity_window_months")]
    pub activity_window_months: u32,

    /// Months between the first notice and the communicated login deadline.
    #[serde(default = "default_login_grace_months")]
    pub login_grace_months: u32,

    /// Policies keyed by organization.
    pub organizations: BTreeMap<OrganizationName, OrganizationPolicy>,
}

fn default_settle_delay_secs() -> u64 {
    130
}

fn default_rate_limit_buffer_secs() -> u64 {
    5
}

fn default_identity_window_days() -> u32 {
    90
}

fn default_activity_window_months() -> u32 {
    3
}

fn default_login_grace_months() -> u32 {
    1
}

impl DormancyConfig {
    /// The built-in configuration for the supported organizations.
    pub fn builtin() -> Self {
        let mut organizations = BTreeMap::new();
        organizations.insert(
            builtin_org(MINISTRY_OF_JUSTICE),
            OrganizationPolicy {
                allow_list: username_set(MINISTRY_OF_JUSTICE_ALLOW_LIST),
                consult_identity_provider: true,
                templates: builtin_templates(
                    "30351e8f-320b-4ebe-b0bf-d6aa0a7c607d",
                    "7405b6f8-9355-4572-8b8c-c73bc8cdee3c",
                    "d1698bc9-7176-4d54-bece-e68d03d5896a",
                ),
                reply_to_id: Some(OPERATIONS_ENGINEERING_REPLY_TO.to_string()),
            },
        );
        organizations.insert(
            builtin_org(MOJ_ANALYTICAL_SERVICES),
            OrganizationPolicy {
                allow_list: UsernameSet::new(),
                consult_identity_provider: false,
                templates: builtin_templates(
                    "ac0e8752-f550-4550-bff7-ba739a3f2977",
                    "13863d96-7986-4c3b-967e-3123a6773896",
                    "762646ac-0f88-4371-8550-3b6acf66334a",
                ),
                reply_to_id: Some(OPERATIONS_ENGINEERING_REPLY_TO.to_string()),
            },
        );

        Self {
            settle_delay_secs: default_settle_delay_secs(),
            rate_limit_buffer_secs: default_rate_limit_buffer_secs(),
            identity_window_days: default_identity_window_days(),
            activity_window_months: default_activity_window_months(),
            login_grace_months: default_login_grace_months(),
            organizations,
        }
    }

    /// Parses a TOML configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self, DormancyError> {
        toml_from_str(raw)
    }

    /// Returns the policy for `organization`.
    ///
    /// An organization without a policy is a configuration error; the workflow
    /// never runs with an implicit empty allow-list.
    pub fn policy(&self, organization: &OrganizationName) -> Result<&OrganizationPolicy, DormancyError> {
        self.organizations
            .get(organization)
            .ok_or_else(|| DormancyError::Configuration {
                message: format!("unsupported GitHub organization '{organization}'"),
            })
    }

    /// Returns the post-notify settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Returns the rate-limit wait buffer.
    pub fn rate_limit_buffer(&self) -> Duration {
        Duration::from_secs(self.rate_limit_buffer_secs)
    }
}

impl Default for DormancyConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_org(name: &'static str) -> OrganizationName {
    OrganizationName::from_static(name)
}

fn builtin_templates(
    first_notice: &'static str,
    reminder: &'static str,
    removed: &'static str,
) -> EmailTemplates {
    EmailTemplates {
        first_notice: TemplateId::from_static(first_notice),
        reminder: TemplateId::from_static(reminder),
        removed: TemplateId::from_static(removed),
    }
}

fn toml_from_str(raw: &str) -> Result<DormancyConfig, DormancyError> {
    toml::from_str(raw).map_err(|e| DormancyError::Configuration {
        message: format!("invalid configuration file: {e}"),
    })
}
