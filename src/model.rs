use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a digest batch.
///
/// Transitions move forward only: CREATED -> PREPARED -> SENT | FAILED.
/// FAILED digests may be retried (another send attempt), SENT is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DigestStatus {
    Created,
    Prepared,
    Sent,
    Failed,
}

impl DigestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestStatus::Created => "CREATED",
            DigestStatus::Prepared => "PREPARED",
            DigestStatus::Sent => "SENT",
            DigestStatus::Failed => "FAILED",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(DigestStatus::Created),
            "PREPARED" => Some(DigestStatus::Prepared),
            "SENT" => Some(DigestStatus::Sent),
            "FAILED" => Some(DigestStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the scheduler does with a freshly prepared digest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Notify the validation contacts and wait for a manual send.
    Notify,
    /// Send to the configured recipient groups immediately.
    Send,
}

/// One row of the mailing log: a CRM mailing sent for one content entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingRecord {
    pub mailing_id: i64,
    pub entity_type_id: String,
    pub entity_id: i64,
    pub entity_bundle: String,
    pub langcode: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub id: i64,
    pub status: DigestStatus,
    pub crm_mailing_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Output of the eligibility selection.
///
/// Both views are needed downstream: entity ids (grouped by entity type)
/// for rendering, and the ordered mailing id list for the link table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedContent {
    pub entity_ids_by_type: BTreeMap<String, Vec<i64>>,
    pub mailing_ids: Vec<i64>,
}

impl SelectedContent {
    pub fn is_empty(&self) -> bool {
        self.mailing_ids.is_empty()
    }
}

/// A composed digest payload ready to hand to the mailing system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedDigest {
    pub digest_id: i64,
    pub title: String,
    pub body_html: String,
    /// Absolute permalink to the digest's own persisted view.
    pub permalink: String,
    /// Number of entities that actually rendered (0 for a no-content payload).
    pub entity_count: usize,
}
