//! Dormancy classification: ordered set subtraction over the signals.

use tracing::{debug, info};

use crate::signals::DormancySignals;
use crate::{DormancyError, Username, UsernameSet};

/// Decides which members of one organization are dormant.
///
/// The allow-list is fixed at construction so the classifier carries the
/// organization's policy explicitly instead of looking it up at call time.
#[derive(Debug, Clone)]
pub struct DormancyClassifier {
    allow_list: UsernameSet,
}

impl DormancyClassifier {
    pub fn new(allow_list: UsernameSet) -> Self {
        Self { allow_list }
    }

    /// Returns the dormant usernames sorted ascending.
    ///
    /// The candidate set shrinks in a fixed order: restrict the export to
    /// members, drop outside collaborators, then the allow-list, then every
    /// activity signal. The audit log is only queried for what is left, and
    /// not at all when nothing is left.
    pub async fn classify(
        &self,
        signals: &dyn DormancySignals,
    ) -> Result<Vec<Username>, DormancyError> {
        let members = signals.org_members().await?;
        if members.is_empty() {
            info!("Organization has no members; nothing to classify");
            return Ok(Vec::new());
        }

        let mut candidates: UsernameSet = signals
            .dormant_candidates()
            .await?
            .into_iter()
            .filter(|record| !record.is_outside_collaborator)
            .map(|record| record.username)
            .filter(|username| members.contains(username))
            .collect();
        debug!(count = candidates.len(), "Dormant candidates among members");

        candidates.retain(|username| !self.allow_list.contains(username));
        debug!(count = candidates.len(), "After allow-list");

        let identity_active = signals.auth0_active_users().await?;
        candidates.retain(|username| !identity_active.contains(username));
        debug!(count = candidates.len(), "After identity provider activity");

        let snapshot_active = signals.org_activity_snapshot_active_users().await?;
        candidates.retain(|username| !snapshot_active.contains(username));
        debug!(count = candidates.len(), "After org activity snapshot");

        if !candidates.is_empty() {
            let audit_active = signals.audit_log_active_users(&candidates).await?;
            candidates.retain(|username| !audit_active.contains(username));
            debug!(count = candidates.len(), "After audit log activity");
        }

        info!(count = candidates.len(), "Classified dormant users");
        // BTreeSet iteration is already ordered by username.
        Ok(candidates.into_iter().collect())
    }
}
