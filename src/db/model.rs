use crate::model::DigestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the digest listing.
///
/// `group_ids` comes from an outer join against the group-link table,
/// which is only populated at send time, so it is empty for any digest
/// that has not reached SENT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSummary {
    pub digest_id: i64,
    pub status: DigestStatus,
    pub created_at: DateTime<Utc>,
    pub group_ids: Vec<i64>,
}
