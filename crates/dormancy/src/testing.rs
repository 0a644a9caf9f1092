//! In-memory fakes for every port, shared by the unit tests of this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ports::{
    Clock, EmailNotifier, IdentityProvider, ObjectStore, ObjectVersion, OperatorAlerts,
    OrgDirectory, Precondition, Sleeper, VersionedObject,
};
use crate::signals::DormancySignals;
use crate::{
    username_set, DormancyError, DormantCandidateRecord, EmailAddress, OrganizationName,
    Personalisation, ProviderError, StoreError, TemplateId, UndeliveredEmail, Username,
    UsernameSet,
};

fn username(login: &str) -> Username {
    Username::new(login).expect("test login must not be empty")
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    pub members: Mutex<UsernameSet>,
    pub outside: Mutex<UsernameSet>,
    pub emails: Mutex<BTreeMap<Username, EmailAddress>>,
    pub audit: Mutex<BTreeMap<Username, Option<DateTime<Utc>>>>,
    pub removed: Mutex<Vec<Username>>,
    pub member_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_members<I: IntoIterator<Item = &'static str>>(logins: I) -> Self {
        let directory = Self::default();
        *directory.members.lock().unwrap() = username_set(logins);
        directory
    }

    pub fn set_email(&self, login: &str, address: &str) {
        self.emails
            .lock()
            .unwrap()
            .insert(username(login), EmailAddress::from_optional(Some(address)));
    }

    pub fn set_outside<I: IntoIterator<Item = &'static str>>(&self, logins: I) {
        *self.outside.lock().unwrap() = username_set(logins);
    }

    pub fn set_audit(&self, login: &str, at: Option<DateTime<Utc>>) {
        self.audit.lock().unwrap().insert(username(login), at);
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl OrgDirectory for FakeDirectory {
    async fn members(&self) -> Result<UsernameSet, ProviderError> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.members.lock().unwrap().clone())
    }

    async fn outside_collaborators(&self) -> Result<UsernameSet, ProviderError> {
        Ok(self.outside.lock().unwrap().clone())
    }

    async fn verified_email(&self, username: &Username) -> Result<EmailAddress, ProviderError> {
        Ok(self
            .emails
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or(EmailAddress::Missing))
    }

    async fn latest_audit_activity(
        &self,
        username: &Username,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(self.audit.lock().unwrap().get(username).copied().flatten())
    }

    async fn remove_member(&self, username: &Username) -> Result<(), ProviderError> {
        self.members.lock().unwrap().remove(username);
        self.removed.lock().unwrap().push(username.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeIdentity {
    pub active: UsernameSet,
    pub calls: AtomicUsize,
    pub last_since: Mutex<Option<DateTime<Utc>>>,
}

impl FakeIdentity {
    pub fn with_active<I: IntoIterator<Item = &'static str>>(logins: I) -> Self {
        Self {
            active: username_set(logins),
            ..Self::default()
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn active_usernames_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<UsernameSet, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock().unwrap() = Some(since);
        Ok(self.active.clone())
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub template: TemplateId,
    pub address: String,
    pub personalisation: Personalisation,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentEmail>>,
    pub failed: Mutex<Vec<UndeliveredEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with(&self, template: &TemplateId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|email| &email.template == template)
            .map(|email| email.address)
            .collect()
    }
}

#[async_trait]
impl EmailNotifier for RecordingNotifier {
    async fn send_email(
        &self,
        template: &TemplateId,
        address: &str,
        personalisation: &Personalisation,
    ) -> Result<(), ProviderError> {
        self.sent.lock().unwrap().push(SentEmail {
            template: template.clone(),
            address: address.to_string(),
            personalisation: personalisation.clone(),
        });
        Ok(())
    }

    async fn failed_notifications(
        &self,
        _template: &TemplateId,
    ) -> Result<Vec<UndeliveredEmail>, ProviderError> {
        Ok(self.failed.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    UnknownAllowList(UsernameSet),
    Undelivered(Vec<String>),
    Removed(usize),
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub alerts: Mutex<Vec<Alert>>,
    /// When set, every alert is recorded and then fails like a Slack outage.
    pub failing: AtomicBool,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    fn record(&self, alert: Alert) -> Result<(), ProviderError> {
        self.alerts.lock().unwrap().push(alert);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Request {
                provider: "slack",
                message: "channel_not_found".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OperatorAlerts for RecordingAlerts {
    async fn unknown_allow_list_users(&self, users: &UsernameSet) -> Result<(), ProviderError> {
        self.record(Alert::UnknownAllowList(users.clone()))
    }

    async fn undelivered_emails(
        &self,
        _organization: &OrganizationName,
        addresses: &[String],
    ) -> Result<(), ProviderError> {
        self.record(Alert::Undelivered(addresses.to_vec()))
    }

    async fn users_removed(
        &self,
        _organization: &OrganizationName,
        count: usize,
    ) -> Result<(), ProviderError> {
        self.record(Alert::Removed(count))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Versioned in-memory store. Versions are a monotonically increasing counter.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, ObjectVersion)>>,
    next_version: AtomicU64,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryStore {
    /// Seeds or overwrites an object outside the port, as an external
    /// producer would.
    pub fn insert(&self, key: &str, bytes: impl AsRef<[u8]>) -> ObjectVersion {
        let version = self.bump();
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes.as_ref().to_vec(), version.clone()));
        version
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    fn bump(&self) -> ObjectVersion {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        ObjectVersion::new(format!("v{n}"))
    }

    fn check(
        key: &str,
        current: Option<&ObjectVersion>,
        precondition: &Precondition,
    ) -> Result<(), StoreError> {
        match (precondition, current) {
            (Precondition::None, _) => Ok(()),
            (Precondition::MustNotExist, None) => Ok(()),
            (Precondition::MustNotExist, Some(_)) => {
                Err(StoreError::conflict(key, "object already exists"))
            }
            (Precondition::MatchVersion(expected), Some(actual)) if expected == actual => Ok(()),
            (Precondition::MatchVersion(expected), _) => Err(StoreError::conflict(
                key,
                format!("expected version {expected}"),
            )),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<VersionedObject, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, version)| VersionedObject {
                bytes: bytes.clone(),
                version: version.clone(),
            })
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn version(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError> {
        Ok(self.objects.lock().unwrap().get(key).map(|(_, v)| v.clone()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<ObjectVersion, StoreError> {
        let mut objects = self.objects.lock().unwrap();
        Self::check(key, objects.get(key).map(|(_, v)| v), &precondition)?;
        let version = self.bump();
        objects.insert(key.to_string(), (bytes, version.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }

    async fn delete(&self, key: &str, precondition: Precondition) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        Self::check(key, objects.get(key).map(|(_, v)| v), &precondition)?;
        objects.remove(key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Frozen signal snapshots for classifier tests.
#[derive(Default)]
pub struct StaticSignals {
    pub members: UsernameSet,
    pub candidates: Vec<DormantCandidateRecord>,
    pub identity_active: UsernameSet,
    pub snapshot_active: UsernameSet,
    pub audit_active: UsernameSet,
    pub fail_snapshot: bool,
    pub audit_queries: Mutex<Vec<UsernameSet>>,
}

impl Clone for StaticSignals {
    /// Clones the snapshots; the audit query log starts empty.
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            candidates: self.candidates.clone(),
            identity_active: self.identity_active.clone(),
            snapshot_active: self.snapshot_active.clone(),
            audit_active: self.audit_active.clone(),
            fail_snapshot: self.fail_snapshot,
            audit_queries: Mutex::default(),
        }
    }
}

impl StaticSignals {
    pub fn records<I: IntoIterator<Item = &'static str>>(logins: I) -> Vec<DormantCandidateRecord> {
        logins
            .into_iter()
            .map(|login| DormantCandidateRecord {
                username: username(login),
                is_outside_collaborator: false,
            })
            .collect()
    }

    pub fn audit_queries(&self) -> usize {
        self.audit_queries.lock().unwrap().len()
    }

    pub fn audit_queried_with(&self) -> Vec<UsernameSet> {
        self.audit_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DormancySignals for StaticSignals {
    async fn org_members(&self) -> Result<UsernameSet, DormancyError> {
        Ok(self.members.clone())
    }

    async fn dormant_export(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError> {
        Ok(self.candidates.clone())
    }

    async fn dormant_candidates(&self) -> Result<Vec<DormantCandidateRecord>, DormancyError> {
        Ok(self.candidates.clone())
    }

    async fn auth0_active_users(&self) -> Result<UsernameSet, DormancyError> {
        Ok(self.identity_active.clone())
    }

    async fn org_activity_snapshot_active_users(&self) -> Result<UsernameSet, DormancyError> {
        if self.fail_snapshot {
            return Err(DormancyError::StateMissing {
                key: "export-test.json".to_string(),
            });
        }
        Ok(self.snapshot_active.clone())
    }

    async fn audit_log_active_users(
        &self,
        candidates: &UsernameSet,
    ) -> Result<UsernameSet, DormancyError> {
        self.audit_queries.lock().unwrap().push(candidates.clone());
        Ok(candidates.intersection(&self.audit_active).cloned().collect())
    }
}
