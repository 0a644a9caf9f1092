//! Parsers for the externally produced exports and the in-flight state object.
//!
//! | Document | Key | Format |
//! |----------|-----|--------|
//! | Dormant-user export | `dormant.csv` | CSV, header row, column 2 = login, column 6 = outside-collaborator flag |
//! | Org people snapshot | `export-<org>.json` | `[{"login": .., "last_active": ..}]` |
//! | In-flight list | `<org>_first_email_list.json` | `[EmailedUserRecord]` |

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    DormancyError, DormantCandidateRecord, EmailedUserRecord, OrganizationName, Username,
    UsernameSet,
};

const USERNAME_COLUMN: usize = 2;
const OUTSIDE_COLLABORATOR_COLUMN: usize = 6;

/// `last_active` value for members the snapshot has never seen active.
pub const NO_ACTIVITY: &str = "no activity";

/// Object key of the dormant-user export.
pub const DORMANT_EXPORT_KEY: &str = "dormant.csv";

/// Object key of the org people snapshot for `organization`.
pub fn activity_snapshot_key(organization: &OrganizationName) -> String {
    format!("export-{organization}.json")
}

/// Object key of the in-flight list for `organization`.
pub fn emailed_users_key(organization: &OrganizationName) -> String {
    format!("{organization}_first_email_list.json")
}

// ---------------------------------------------------------------------------
// Dormant-user export
// ---------------------------------------------------------------------------

/// Parses the dormant-user export. The first row is a header and is skipped.
pub fn parse_dormant_export(bytes: &[u8]) -> Result<Vec<DormantCandidateRecord>, DormancyError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| DormancyError::malformed("dormant user export", e))?;
        let column = |position: usize| {
            row.get(position).ok_or_else(|| {
                DormancyError::malformed(
                    "dormant user export",
                    format!("row {} has no column {position}", index + 1),
                )
            })
        };

        let Some(username) = Username::new(column(USERNAME_COLUMN)?) else {
            continue;
        };
        let is_outside_collaborator = parse_flag(column(OUTSIDE_COLLABORATOR_COLUMN)?);
        records.push(DormantCandidateRecord {
            username,
            is_outside_collaborator,
        });
    }
    Ok(records)
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim(), "true" | "True")
}

// ---------------------------------------------------------------------------
// Org people snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    login: String,
    last_active: String,
}

/// Usernames whose snapshot `last_active` date is after `cutoff`.
///
/// Entries marked [`NO_ACTIVITY`] are skipped. Only the leading `YYYY-MM-DD`
/// of the timestamp is significant.
pub fn parse_active_snapshot_users(
    bytes: &[u8],
    cutoff: DateTime<Utc>,
) -> Result<UsernameSet, DormancyError> {
    let entries: Vec<SnapshotEntry> = serde_json::from_slice(bytes)
        .map_err(|e| DormancyError::malformed("org activity snapshot", e))?;

    let mut active = UsernameSet::new();
    for entry in entries {
        if entry.last_active.trim().eq_ignore_ascii_case(NO_ACTIVITY) {
            continue;
        }
        let Some(username) = Username::new(&entry.login) else {
            continue;
        };
        let day = entry.last_active.get(..10).unwrap_or(&entry.last_active);
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
            DormancyError::malformed(
                "org activity snapshot",
                format!("last_active '{}' for {}: {e}", entry.last_active, entry.login),
            )
        })?;
        if date > cutoff.date_naive() {
            active.insert(username);
        }
    }
    Ok(active)
}

// ---------------------------------------------------------------------------
// In-flight list
// ---------------------------------------------------------------------------

/// Decodes the persisted in-flight list.
pub fn decode_emailed_users(bytes: &[u8]) -> Result<Vec<EmailedUserRecord>, DormancyError> {
    serde_json::from_slice(bytes).map_err(|e| DormancyError::malformed("emailed users list", e))
}

/// Encodes the in-flight list for persistence.
pub fn encode_emailed_users(records: &[EmailedUserRecord]) -> Result<Vec<u8>, DormancyError> {
    serde_json::to_vec(records).map_err(|e| DormancyError::malformed("emailed users list", e))
}
