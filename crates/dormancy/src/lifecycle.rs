//! The three-phase dormant-user lifecycle.
//!
//! Each phase is a separate process invocation in production, hours or days
//! apart. The in-flight list persisted by phase 1 is the only state carried
//! between them.
//!
//! | Phase | Reads | Side effects | State |
//! |-------|-------|--------------|-------|
//! | notify | all signals, verified emails | first-notice emails, operator alerts | conditional put |
//! | remind | in-flight list | reminder emails | none |
//! | remove | in-flight list, all signals | removals, removal emails, operator alert | conditional delete |
//!
//! Per user the workflow moves through
//! `CANDIDATE -> NOTIFIED -> REMINDED -> REMOVED | RESCUED`; a user who is
//! active on any signal or allow-listed never becomes a candidate.
//!
//! ## Failure model
//!
//! Any signal, store, or provider error aborts the running phase. Work done
//! before the failure is not rolled back. Operator alerts are the exception:
//! a failed alert is logged and the phase carries on. Removal is idempotent, so phase 3
//! can be rerun after a partial batch.
//!
//! ## Debug mode
//!
//! [`RunMode::Debug`] performs every read but no side effect: no email, no
//! alert, no removal, no state write or delete. What would have happened is
//! logged instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Months, NaiveDate};
use tracing::{info, info_span, warn, Instrument};

use crate::classifier::DormancyClassifier;
use crate::exports::{decode_emailed_users, emailed_users_key, encode_emailed_users};
use crate::ports::{
    Clock, EmailNotifier, ObjectStore, ObjectVersion, OperatorAlerts, OrgDirectory, Precondition,
    Sleeper,
};
use crate::signals::DormancySignals;
use crate::{
    DormancyConfig, DormancyError, EmailTemplates, EmailedUserRecord, LoginDate,
    OrganizationName, Personalisation, ProviderError, RunId, TemplateId, Username, UsernameSet,
};

/// Whether the run may cause side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Emails, alerts, removals and state writes happen.
    Live,
    /// Reads only; intended effects are logged.
    Debug,
}

/// Which phases one invocation runs. Selected phases always run in the
/// order notify, remind, remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSelection {
    pub notify: bool,
    pub remind: bool,
    pub remove: bool,
}

impl PhaseSelection {
    /// `true` when no phase is selected.
    pub fn is_empty(&self) -> bool {
        !(self.notify || self.remind || self.remove)
    }
}

/// Outcome of phase 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Allow-list entries that are not organization members.
    pub unknown_allow_list: UsernameSet,
    /// Dormant users that are outside collaborators; reported only.
    pub dormant_outside_collaborators: UsernameSet,
    /// The in-flight list produced by this run.
    pub notified: Vec<EmailedUserRecord>,
    /// First-notice emails actually sent.
    pub emails_sent: usize,
    /// Addresses from this batch that the email provider failed to deliver.
    pub undelivered: Vec<String>,
}

/// Outcome of phase 2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemindReport {
    /// In-flight users that were considered for a reminder.
    pub reminded: Vec<Username>,
    /// Reminder emails actually sent.
    pub emails_sent: usize,
}

/// Outcome of phase 3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    /// Users removed from the organization.
    pub removed: Vec<Username>,
    /// In-flight users that became active again and were kept.
    pub rescued: Vec<Username>,
    /// Removal emails actually sent.
    pub emails_sent: usize,
}

/// Combined outcome of [`LifecycleOrchestrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub notify: Option<NotifyReport>,
    pub remind: Option<RemindReport>,
    pub remove: Option<RemoveReport>,
}

/// The collaborators the orchestrator drives.
#[derive(Clone)]
pub struct LifecyclePorts {
    pub signals: Arc<dyn DormancySignals>,
    pub directory: Arc<dyn OrgDirectory>,
    pub notifier: Arc<dyn EmailNotifier>,
    pub alerts: Arc<dyn OperatorAlerts>,
    pub store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the lifecycle phases for one organization.
pub struct LifecycleOrchestrator {
    organization: OrganizationName,
    run_id: RunId,
    mode: RunMode,
    allow_list: UsernameSet,
    templates: EmailTemplates,
    settle_delay: Duration,
    login_grace_months: u32,
    classifier: DormancyClassifier,
    ports: LifecyclePorts,
}

impl LifecycleOrchestrator {
    /// Builds an orchestrator from the organization's policy in `config`.
    ///
    /// Fails with [`DormancyError::Configuration`] for an organization that
    /// has no policy.
    pub fn new(
        organization: OrganizationName,
        config: &DormancyConfig,
        mode: RunMode,
        ports: LifecyclePorts,
    ) -> Result<Self, DormancyError> {
        let policy = config.policy(&organization)?;
        Ok(Self {
            run_id: RunId::new_random(),
            mode,
            allow_list: policy.allow_list.clone(),
            templates: policy.templates.clone(),
            settle_delay: config.settle_delay(),
            login_grace_months: config.login_grace_months,
            classifier: DormancyClassifier::new(policy.allow_list.clone()),
            ports,
            organization,
        })
    }

    /// The identifier attached to every span of this run.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Runs the selected phases in order, stopping at the first failure.
    pub async fn run(&self, selection: PhaseSelection) -> Result<RunReport, DormancyError> {
        let mut report = RunReport::default();
        if selection.notify {
            report.notify = Some(self.notify().await?);
        }
        if selection.remind {
            report.remind = Some(self.remind().await?);
        }
        if selection.remove {
            report.remove = Some(self.remove().await?);
        }
        Ok(report)
    }

    /// Phase 1: classify, notify and persist the in-flight list.
    pub async fn notify(&self) -> Result<NotifyReport, DormancyError> {
        self.notify_phase().instrument(self.span("notify")).await
    }

    /// Phase 2: remind every in-flight user.
    pub async fn remind(&self) -> Result<RemindReport, DormancyError> {
        self.remind_phase().instrument(self.span("remind")).await
    }

    /// Phase 3: remove in-flight users that are still dormant.
    pub async fn remove(&self) -> Result<RemoveReport, DormancyError> {
        self.remove_phase().instrument(self.span("remove")).await
    }

    fn span(&self, phase: &'static str) -> tracing::Span {
        info_span!(
            "phase",
            organization = %self.organization,
            phase,
            run_id = %self.run_id,
            debug = self.is_debug()
        )
    }

    fn is_debug(&self) -> bool {
        self.mode == RunMode::Debug
    }

    fn state_key(&self) -> String {
        emailed_users_key(&self.organization)
    }

    // -----------------------------------------------------------------------
    // Phase 1
    // -----------------------------------------------------------------------

    async fn notify_phase(&self) -> Result<NotifyReport, DormancyError> {
        let ports = &self.ports;
        ports.signals.invalidate();

        let key = self.state_key();
        let observed = if self.is_debug() {
            None
        } else {
            Some(ports.store.version(&key).await?)
        };

        let mut report = NotifyReport {
            unknown_allow_list: self.report_unknown_allow_list().await?,
            dormant_outside_collaborators: self.report_dormant_outside_collaborators().await?,
            ..NotifyReport::default()
        };

        let dormant = self.classifier.classify(ports.signals.as_ref()).await?;
        let login_date = self.login_date()?;
        for username in dormant {
            let email_address = ports
                .directory
                .verified_email(&username)
                .await
                .map_err(DormancyError::provider("resolve verified email"))?;
            if email_address.is_missing() {
                warn!(%username, "No organization verified email address");
            }
            report.notified.push(EmailedUserRecord {
                email_address,
                username,
                login_date,
                is_outside_collaborator: false,
            });
        }

        let Some(observed) = observed else {
            for record in &report.notified {
                info!(
                    username = %record.username,
                    email = %record.email_address,
                    %login_date,
                    "Debug mode: would send first notice"
                );
            }
            info!(count = report.notified.len(), "Debug mode: in-flight list not persisted");
            return Ok(report);
        };

        let current = ports.store.version(&key).await?;
        if current != observed {
            return Err(DormancyError::StateConflict {
                key,
                message: "in-flight list changed while classifying".to_string(),
            });
        }

        let personalisation = login_personalisation(login_date);
        for record in &report.notified {
            if let Some(address) = record.email_address.as_deliverable() {
                self.send(&self.templates.first_notice, address, &personalisation)
                    .await?;
                report.emails_sent += 1;
            }
        }

        let bytes = encode_emailed_users(&report.notified)?;
        let version = ports
            .store
            .put(&key, bytes, Precondition::observed(observed))
            .await?;
        info!(
            count = report.notified.len(),
            %version,
            "Persisted in-flight list"
        );

        if report.emails_sent > 0 {
            info!(
                delay_secs = self.settle_delay.as_secs(),
                "Waiting for email delivery to settle"
            );
            ports.sleeper.sleep(self.settle_delay).await;
            report.undelivered = self.undelivered_first_notices(&report.notified).await?;
        }

        info!(
            notified = report.notified.len(),
            emails_sent = report.emails_sent,
            undelivered = report.undelivered.len(),
            "Notify phase complete"
        );
        Ok(report)
    }

    async fn report_unknown_allow_list(&self) -> Result<UsernameSet, DormancyError> {
        let members = self.ports.signals.org_members().await?;
        let unknown: UsernameSet = self.allow_list.difference(&members).cloned().collect();
        if unknown.is_empty() {
            return Ok(unknown);
        }
        if self.is_debug() {
            for username in &unknown {
                warn!(%username, "Allow-list entry is not an organization member");
            }
        } else if let Err(error) = self.ports.alerts.unknown_allow_list_users(&unknown).await {
            alert_failed("unknown allow-list users", &error);
        }
        Ok(unknown)
    }

    async fn report_dormant_outside_collaborators(&self) -> Result<UsernameSet, DormancyError> {
        let collaborators = self
            .ports
            .directory
            .outside_collaborators()
            .await
            .map_err(DormancyError::provider("fetch outside collaborators"))?;
        let dormant: UsernameSet = self
            .ports
            .signals
            .dormant_export()
            .await?
            .into_iter()
            .map(|record| record.username)
            .filter(|username| collaborators.contains(username))
            .collect();
        for username in &dormant {
            info!(%username, "Dormant outside collaborator");
        }
        Ok(dormant)
    }

    async fn undelivered_first_notices(
        &self,
        batch: &[EmailedUserRecord],
    ) -> Result<Vec<String>, DormancyError> {
        let today = self.ports.clock.now().date_naive();
        let failed = self
            .ports
            .notifier
            .failed_notifications(&self.templates.first_notice)
            .await
            .map_err(DormancyError::provider("fetch failed notifications"))?;

        let mut undelivered: Vec<String> = failed
            .into_iter()
            .filter(|email| email.created_at.date_naive() == today)
            .map(|email| email.email_address.to_lowercase())
            .filter(|address| {
                batch
                    .iter()
                    .filter_map(|record| record.email_address.as_deliverable())
                    .any(|sent| sent.eq_ignore_ascii_case(address))
            })
            .collect();
        undelivered.sort();
        undelivered.dedup();

        if !undelivered.is_empty() {
            warn!(count = undelivered.len(), "First notices were not delivered");
            if let Err(error) = self
                .ports
                .alerts
                .undelivered_emails(&self.organization, &undelivered)
                .await
            {
                alert_failed("undelivered emails", &error);
            }
        }
        Ok(undelivered)
    }

    fn login_date(&self) -> Result<LoginDate, DormancyError> {
        let today = self.ports.clock.now().date_naive();
        add_months(today, self.login_grace_months).map(LoginDate::new)
    }

    // -----------------------------------------------------------------------
    // Phase 2
    // -----------------------------------------------------------------------

    async fn remind_phase(&self) -> Result<RemindReport, DormancyError> {
        let (mut records, _) = self.load_in_flight().await?;
        records.retain(|record| {
            let allowed = self.allow_list.contains(&record.username);
            if allowed {
                info!(username = %record.username, "Skipping allow-listed in-flight user");
            }
            !allowed
        });
        records.sort_by(|a, b| a.username.cmp(&b.username));

        let mut report = RemindReport::default();
        for record in &records {
            report.reminded.push(record.username.clone());
            let Some(address) = record.email_address.as_deliverable() else {
                info!(username = %record.username, "No email address; reminder skipped");
                continue;
            };
            if self.is_debug() {
                info!(username = %record.username, email = address, "Debug mode: would send reminder");
                continue;
            }
            self.send(
                &self.templates.reminder,
                address,
                &login_personalisation(record.login_date),
            )
            .await?;
            report.emails_sent += 1;
        }

        info!(
            reminded = report.reminded.len(),
            emails_sent = report.emails_sent,
            "Remind phase complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Phase 3
    // -----------------------------------------------------------------------

    async fn remove_phase(&self) -> Result<RemoveReport, DormancyError> {
        let ports = &self.ports;
        let (records, version) = self.load_in_flight().await?;

        ports.signals.invalidate();
        let dormant: UsernameSet = self
            .classifier
            .classify(ports.signals.as_ref())
            .await?
            .into_iter()
            .collect();

        let mut report = RemoveReport::default();
        let mut to_remove: Vec<&EmailedUserRecord> = Vec::new();
        for record in &records {
            if dormant.contains(&record.username) {
                to_remove.push(record);
            } else {
                info!(username = %record.username, "User is active again and will be kept");
                report.rescued.push(record.username.clone());
            }
        }
        to_remove.sort_by(|a, b| a.username.cmp(&b.username));
        to_remove.dedup_by(|a, b| a.username == b.username);

        for record in to_remove {
            let username = &record.username;
            if self.is_debug() {
                info!(%username, email = %record.email_address, "Debug mode: would remove user");
                report.removed.push(username.clone());
                continue;
            }
            ports
                .directory
                .remove_member(username)
                .await
                .map_err(DormancyError::provider("remove organization member"))?;
            info!(%username, "Removed user from organization");
            report.removed.push(username.clone());

            if let Some(address) = record.email_address.as_deliverable() {
                self.send(&self.templates.removed, address, &Personalisation::new())
                    .await?;
                report.emails_sent += 1;
            }
        }

        if self.is_debug() {
            info!(
                would_remove = report.removed.len(),
                "Debug mode: no alert sent and in-flight list kept"
            );
            return Ok(report);
        }

        ports
            .store
            .delete(&self.state_key(), Precondition::MatchVersion(version))
            .await?;

        if !report.removed.is_empty() {
            if let Err(error) = ports
                .alerts
                .users_removed(&self.organization, report.removed.len())
                .await
            {
                alert_failed("removed users", &error);
            }
        }
        info!(
            removed = report.removed.len(),
            rescued = report.rescued.len(),
            "Remove phase complete; in-flight list deleted"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    async fn load_in_flight(&self) -> Result<(Vec<EmailedUserRecord>, ObjectVersion), DormancyError> {
        let object = self.ports.store.get(&self.state_key()).await?;
        let records = decode_emailed_users(&object.bytes)?;
        info!(count = records.len(), version = %object.version, "Loaded in-flight list");
        Ok((records, object.version))
    }

    async fn send(
        &self,
        template: &TemplateId,
        address: &str,
        personalisation: &Personalisation,
    ) -> Result<(), DormancyError> {
        self.ports
            .notifier
            .send_email(template, address, personalisation)
            .await
            .map_err(DormancyError::provider("send email"))
    }
}

fn alert_failed(alert: &'static str, error: &ProviderError) {
    warn!(alert, error = %error, "Operator alert could not be delivered");
}

fn login_personalisation(login_date: LoginDate) -> Personalisation {
    Personalisation::from([("login_date".to_string(), login_date.to_string())])
}

fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate, DormancyError> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| DormancyError::Configuration {
            message: format!("login grace period of {months} months is out of range"),
        })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
