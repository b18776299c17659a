//! Send gate and handoff to the external mailing system.

use crate::builder::{self, ContentStore};
use crate::config::Config;
use crate::crm::MailingSystem;
use crate::db::{self, Pool};
use crate::error::DigestError;
use crate::model::DigestStatus;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

/// A digest can only be sent from PREPARED or FAILED. SENT is terminal
/// success and a CREATED digest has no content yet.
pub fn can_send(status: DigestStatus) -> bool {
    matches!(status, DigestStatus::Prepared | DigestStatus::Failed)
}

async fn sendable_status(pool: &Pool, digest_id: i64) -> Result<DigestStatus, DigestError> {
    let status = db::digest_status(pool, digest_id)
        .await?
        .ok_or(DigestError::NotFound(digest_id))?;
    if !can_send(status) {
        return Err(DigestError::InvalidState { digest_id, status });
    }
    Ok(status)
}

/// Send a prepared digest to the configured recipient groups.
///
/// On acceptance: status SENT, the returned CRM mailing id and the group
/// links are persisted. On rejection: status FAILED, error surfaced; a
/// later retry is allowed.
#[instrument(skip_all)]
pub async fn send_digest(
    pool: &Pool,
    cfg: &Config,
    store: &dyn ContentStore,
    mailer: &dyn MailingSystem,
    digest_id: i64,
    now: DateTime<Utc>,
) -> Result<i64, DigestError> {
    if !cfg.digest.is_active {
        return Err(DigestError::Inactive);
    }
    sendable_status(pool, digest_id).await?;

    let content = db::digest_content(pool, digest_id).await?;
    let payload = builder::build_digest(store, &cfg.digest, &content, digest_id).await?;

    match mailer
        .send(&payload, cfg.digest.from_contact, &cfg.digest.to_groups)
        .await
    {
        Ok(crm_mailing_id) => {
            db::set_crm_mailing_id(pool, digest_id, crm_mailing_id).await?;
            db::record_sent_groups(pool, digest_id, &cfg.digest.to_groups, now).await?;
            db::set_status(pool, digest_id, DigestStatus::Sent).await?;
            info!(digest_id, crm_mailing_id, "digest sent");
            Ok(crm_mailing_id)
        }
        Err(err) => {
            warn!(digest_id, %err, "digest dispatch rejected");
            db::set_status(pool, digest_id, DigestStatus::Failed).await?;
            Err(err)
        }
    }
}

/// Deliver a digest to the test groups. No status change.
#[instrument(skip_all)]
pub async fn send_test_digest(
    pool: &Pool,
    cfg: &Config,
    store: &dyn ContentStore,
    mailer: &dyn MailingSystem,
    digest_id: i64,
) -> Result<(), DigestError> {
    if !cfg.digest.is_active {
        return Err(DigestError::Inactive);
    }
    sendable_status(pool, digest_id).await?;

    let content = db::digest_content(pool, digest_id).await?;
    let payload = builder::build_digest(store, &cfg.digest, &content, digest_id).await?;
    mailer
        .send_test(&payload, cfg.digest.from_contact, &cfg.digest.test_groups)
        .await
}

/// Ask the validation contacts to review a prepared digest. No status
/// change.
#[instrument(skip_all)]
pub async fn notify_validators(
    pool: &Pool,
    cfg: &Config,
    store: &dyn ContentStore,
    mailer: &dyn MailingSystem,
    digest_id: i64,
) -> Result<(), DigestError> {
    if db::digest_status(pool, digest_id).await?.is_none() {
        return Err(DigestError::NotFound(digest_id));
    }
    let content = db::digest_content(pool, digest_id).await?;
    let payload = builder::build_digest(store, &cfg.digest, &content, digest_id).await?;
    mailer
        .notify_validators(&payload, &cfg.digest.validation_contacts)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_prepared_and_failed_are_sendable() {
        assert!(!can_send(DigestStatus::Created));
        assert!(can_send(DigestStatus::Prepared));
        assert!(!can_send(DigestStatus::Sent));
        assert!(can_send(DigestStatus::Failed));
    }
}
