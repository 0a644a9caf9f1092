//! Dormant-user reconciliation domain.
//!
//! This crate contains every domain concept of the dormant-user workflow:
//! normalized identifiers, the records that flow between phases, the
//! configuration, the classification rules and the three lifecycle phases.
//! Infrastructure crates implement the port traits defined here; they never
//! add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | `Username`, `OrganizationName`, `RunId` |
//! | [`types`] | Records and value types (`EmailedUserRecord`, `EmailAddress`, `LoginDate`) |
//! | [`errors`] | Domain, provider and store error types |
//! | [`config`] | Per-organization policy and timing configuration |
//! | [`ports`] | Traits implemented by the adapter crates |
//! | [`exports`] | Parsers for the dormant export, org snapshot and in-flight list |
//! | [`signals`] | The five classification signals |
//! | [`classifier`] | Ordered set subtraction producing the dormant list |
//! | [`lifecycle`] | notify, remind and remove phases |

pub mod classifier;
pub mod config;
pub mod errors;
pub mod exports;
pub mod identifiers;
pub mod lifecycle;
pub mod ports;
pub mod signals;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use classifier::DormancyClassifier;
pub use config::{DormancyConfig, EmailTemplates, OrganizationPolicy};
pub use errors::{DormancyError, ProviderError, StoreError, StoreErrorCode};
pub use identifiers::{username_set, OrganizationName, RunId, Username, UsernameSet};
pub use lifecycle::{
    LifecycleOrchestrator, LifecyclePorts, NotifyReport, PhaseSelection, RemindReport,
    RemoveReport, RunMode, RunReport,
};
pub use ports::{
    Clock, EmailNotifier, IdentityProvider, ObjectStore, ObjectVersion, OperatorAlerts,
    OrgDirectory, Precondition, Sleeper, SystemClock, VersionedObject,
};
pub use signals::{DormancySignals, SignalAggregator};
pub use types::{
    DormantCandidateRecord, EmailAddress, EmailedUserRecord, LoginDate, Personalisation,
    TemplateId, UndeliveredEmail, MISSING_EMAIL_ADDRESS,
};
