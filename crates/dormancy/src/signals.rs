//! The membership and activity signals a classification is built from.
//!
//! [`DormancySignals`] is the seam between the classifier and the outside
//! world; [`SignalAggregator`] is the production implementation over the
//! port traits. Signals never mutate anything. A failing source is fatal for
//! the run: there is no best-effort mode.
//!
//! | Signal | Source | Meaning |
//! |--------|--------|---------|
//! | `org_members` | GitHub | The universe of the run |
//! | `dormant_candidates` | dormant export | Seed population |
//! | `auth0_active_users` | identity provider | Logged in within the identity window |
//! | `org_activity_snapshot_active_users` | org people snapshot | Active within the activity window |
//! | `audit_log_active_users` | GitHub audit log | Newest entry within the activity window |

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Months, TimeDelta, Utc};
use tracing::{debug, info, instrument};

use crate::exports::{
    activity_snapshot_key, parse_active_snapshot_users, parse_dormant_export, DORMANT_EXPORT_KEY,
};
use crate::ports::{Clock, IdentityProvider, ObjectStore, OrgDirectory};
use crate::{
    DormancyConfig, DormancyError, DormantCandidateRecord, OrganizationName, UsernameSet,
};

/// The five classification signals for one organization.
#[async_trait]
pub trait DormancySignals: Send + Sync {
    /// Current organization members.
    async fn org_members(&self) -> Result<UsernameSet, DormancyError>;

    /// The dormant-user export exactly as produced, without any filtering.
    async fn dormant_export(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError>;

    /// Export records restricted to current members, outside collaborators removed.
    async fn dormant_candidates(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError>;

    /// Users with a recent identity-provider login. Empty for organizations
    /// whose policy does not consult the identity provider.
    async fn auth0_active_users(&self) -> Result<UsernameSet, DormancyError>;

    /// Users the org people snapshot reports as recently active.
    async fn org_activity_snapshot_active_users(&self) -> Result<UsernameSet, DormancyError>;

    /// The subset of `candidates` with recent audit-log activity. A candidate
    /// without any audit-log entry is not active.
    async fn audit_log_active_users(
        &self,
        candidates: &UsernameSet,
    ) -> Result<UsernameSet, DormancyError>;

    /// Drops anything cached so the next phase sees fresh signals.
    fn invalidate(&self) {}
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SignalCache {
    members: Option<UsernameSet>,
    export: Option<Vec<DormantCandidateRecord>>,
}

/// Production [`DormancySignals`] over the port traits.
///
/// Members and the export are fetched at most once between two calls to
/// [`DormancySignals::invalidate`].
pub struct SignalAggregator {
    organization: OrganizationName,
    directory: Arc<dyn OrgDirectory>,
    identity: Option<Arc<dyn IdentityProvider>>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    identity_window_days: u32,
    activity_window_months: u32,
    cache: Mutex<SignalCache>,
}

impl SignalAggregator {
    /// Creates an aggregator for `organization`.
    ///
    /// `identity` is only kept when the organization's policy consults the
    /// identity provider.
    pub fn new(
        organization: OrganizationName,
        config: &DormancyConfig,
        directory: Arc<dyn OrgDirectory>,
        identity: Option<Arc<dyn IdentityProvider>>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DormancyError> {
        let policy = config.policy(&organization)?;
        let identity = if policy.consult_identity_provider {
            Some(identity.ok_or_else(|| DormancyError::Configuration {
                message: format!(
                    "organization '{organization}' consults the identity provider but none is configured"
                ),
            })?)
        } else {
            None
        };

        Ok(Self {
            organization,
            directory,
            identity,
            store,
            clock,
            identity_window_days: config.identity_window_days,
            activity_window_months: config.activity_window_months,
            cache: Mutex::new(SignalCache::default()),
        })
    }

    fn cache(&self) -> MutexGuard<'_, SignalCache> {
        // A poisoned cache only ever holds fully written values.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn activity_cutoff(&self) -> Result<DateTime<Utc>, DormancyError> {
        months_before(self.clock.now(), self.activity_window_months)
    }
}

/// `now` minus `months` calendar months.
pub(crate) fn months_before(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, DormancyError> {
    now.checked_sub_months(Months::new(months))
        .ok_or_else(|| DormancyError::Configuration {
            message: format!("activity window of {months} months is out of range"),
        })
}

#[async_trait]
impl DormancySignals for SignalAggregator {
    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn org_members(&self) -> Result<UsernameSet, DormancyError> {
        if let Some(members) = self.cache().members.clone() {
            return Ok(members);
        }
        let members = self
            .directory
            .members()
            .await
            .map_err(DormancyError::provider("fetch organization members"))?;
        info!(count = members.len(), "Fetched organization members");
        self.cache().members = Some(members.clone());
        Ok(members)
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn dormant_export(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError> {
        if let Some(export) = self.cache().export.clone() {
            return Ok(export);
        }
        let object = self.store.get(DORMANT_EXPORT_KEY).await?;
        let export = parse_dormant_export(&object.bytes)?;
        info!(count = export.len(), "Loaded dormant user export");
        self.cache().export = Some(export.clone());
        Ok(export)
    }

    async fn dormant_candidates(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError> {
        let members = self.org_members().await?;
        let candidates: Vec<_> = self
            .dormant_export()
            .await?
            .into_iter()
            .filter(|record| members.contains(&record.username))
            .filter(|record| !record.is_outside_collaborator)
            .collect();
        debug!(count = candidates.len(), "Dormant candidates among members");
        Ok(candidates)
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn auth0_active_users(&self) -> Result<UsernameSet, DormancyError> {
        let Some(identity) = &self.identity else {
            debug!("Identity provider not consulted for this organization");
            return Ok(UsernameSet::new());
        };
        let since = self.clock.now() - TimeDelta::days(i64::from(self.identity_window_days));
        let active = identity
            .active_usernames_since(since)
            .await
            .map_err(DormancyError::provider("fetch identity provider active users"))?;
        info!(count = active.len(), "Fetched identity provider active users");
        Ok(active)
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn org_activity_snapshot_active_users(&self) -> Result<UsernameSet, DormancyError> {
        let object = self
            .store
            .get(&activity_snapshot_key(&self.organization))
            .await?;
        let active = parse_active_snapshot_users(&object.bytes, self.activity_cutoff()?)?;
        info!(count = active.len(), "Loaded org activity snapshot");
        Ok(active)
    }

    #[instrument(skip(self, candidates), fields(organization = %self.organization, candidates = candidates.len()))]
    async fn audit_log_active_users(
        &self,
        candidates: &UsernameSet,
    ) -> Result<UsernameSet, DormancyError> {
        let cutoff = self.activity_cutoff()?;
        let mut active = UsernameSet::new();
        for username in candidates {
            let latest = self
                .directory
                .latest_audit_activity(username)
                .await
                .map_err(DormancyError::provider("fetch audit log activity"))?;
            match latest {
                Some(at) if at > cutoff => {
                    debug!(%username, last_active = %at, "Audit log shows recent activity");
                    active.insert(username.clone());
                }
                Some(at) => debug!(%username, last_active = %at, "Audit log activity is stale"),
                None => debug!(%username, "No audit log activity"),
            }
        }
        info!(count = active.len(), "Audit log active users");
        Ok(active)
    }

    fn invalidate(&self) {
        *self.cache() = SignalCache::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;

    use super::*;
    use crate::testing::{FakeDirectory, FakeIdentity, FixedClock, MemoryStore};
    use crate::username_set;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn aggregator(
        org: &str,
        directory: Arc<FakeDirectory>,
        identity: Arc<FakeIdentity>,
        store: Arc<MemoryStore>,
    ) -> SignalAggregator {
        SignalAggregator::new(
            OrganizationName::new(org).unwrap(),
            &DormancyConfig::builtin(),
            directory,
            Some(identity),
            store,
            Arc::new(FixedClock(now())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn members_are_fetched_once_until_invalidated() {
        let directory = Arc::new(FakeDirectory::with_members(["alice", "bob"]));
        let signals = aggregator(
            "moj-analytical-services",
            directory.clone(),
            Arc::new(FakeIdentity::default()),
            Arc::new(MemoryStore::default()),
        );

        signals.org_members().await.unwrap();
        signals.org_members().await.unwrap();
        assert_eq!(directory.member_calls.load(Ordering::SeqCst), 1);

        signals.invalidate();
        signals.org_members().await.unwrap();
        assert_eq!(directory.member_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn candidates_are_restricted_to_members_without_outside_collaborators() {
        let store = Arc::new(MemoryStore::default());
        store.insert(
            DORMANT_EXPORT_KEY,
            "created_at,id,login,role,suspended?,last_logged_ip,outside_collaborator\n\
             x,1,alice,member,false,ip,false\n\
             x,2,carol,member,false,ip,false\n\
             x,3,dave,member,false,ip,true\n",
        );
        let signals = aggregator(
            "moj-analytical-services",
            Arc::new(FakeDirectory::with_members(["alice", "dave"])),
            Arc::new(FakeIdentity::default()),
            store,
        );

        let candidates = signals.dormant_candidates().await.unwrap();
        let names: Vec<_> = candidates.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["alice"]);
    }

    #[tokio::test]
    async fn identity_provider_is_skipped_for_other_organizations() {
        let identity = Arc::new(FakeIdentity::with_active(["alice"]));
        let signals = aggregator(
            "moj-analytical-services",
            Arc::new(FakeDirectory::default()),
            identity.clone(),
            Arc::new(MemoryStore::default()),
        );

        assert!(signals.auth0_active_users().await.unwrap().is_empty());
        assert_eq!(identity.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_provider_is_consulted_with_ninety_day_window() {
        let identity = Arc::new(FakeIdentity::with_active(["Alice"]));
        let signals = aggregator(
            "ministryofjustice",
            Arc::new(FakeDirectory::default()),
            identity.clone(),
            Arc::new(MemoryStore::default()),
        );

        let active = signals.auth0_active_users().await.unwrap();
        assert_eq!(active, username_set(["alice"]));
        assert_eq!(
            *identity.last_since.lock().unwrap(),
            Some(now() - TimeDelta::days(90))
        );
    }

    #[test]
    fn consulting_organization_requires_identity_provider() {
        let result = SignalAggregator::new(
            OrganizationName::new("ministryofjustice").unwrap(),
            &DormancyConfig::builtin(),
            Arc::new(FakeDirectory::default()),
            None,
            Arc::new(MemoryStore::default()),
            Arc::new(FixedClock(now())),
        );
        assert!(matches!(result, Err(DormancyError::Configuration { .. })));
    }

    #[tokio::test]
    async fn audit_log_treats_missing_entries_as_inactive() {
        let directory = FakeDirectory::default();
        directory.set_audit(
            "recent",
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()),
        );
        directory.set_audit("stale", Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let signals = aggregator(
            "moj-analytical-services",
            Arc::new(directory),
            Arc::new(FakeIdentity::default()),
            Arc::new(MemoryStore::default()),
        );

        let active = signals
            .audit_log_active_users(&username_set(["recent", "stale", "never"]))
            .await
            .unwrap();
        assert_eq!(active, username_set(["recent"]));
    }

    #[tokio::test]
    async fn missing_snapshot_is_fatal() {
        let signals = aggregator(
            "moj-analytical-services",
            Arc::new(FakeDirectory::default()),
            Arc::new(FakeIdentity::default()),
            Arc::new(MemoryStore::default()),
        );
        let err = signals.org_activity_snapshot_active_users().await.unwrap_err();
        assert!(matches!(err, DormancyError::StateMissing { key } if key == "export-moj-analytical-services.json"));
    }

    #[test]
    fn months_before_handles_month_ends() {
        let end_of_may = Utc.with_ymd_and_hms(2026, 5, 31, 0, 0, 0).unwrap();
        let cutoff = months_before(end_of_may, 3).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }
}
