//! Digest operations: preview, prepare, view, list.

use crate::builder::{self, ContentStore};
use crate::config::Config;
use crate::db::{self, DigestSummary, Pool};
use crate::error::DigestError;
use crate::model::RenderedDigest;
use crate::selector::{self, SelectionCriteria};
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

/// Digest id used when rendering a preview that is not persisted yet.
pub const PREVIEW_DIGEST_ID: i64 = 0;

/// Whether the next digest would have any content. False when the digest
/// feature is inactive.
pub async fn has_digest_content(
    pool: &Pool,
    cfg: &Config,
    now: DateTime<Utc>,
) -> Result<bool, DigestError> {
    if !cfg.digest.is_active {
        return Ok(false);
    }
    let criteria = SelectionCriteria::from_config(&cfg.digest);
    let selected = selector::select_eligible_mailings(pool, &criteria, now).await?;
    Ok(!selected.is_empty())
}

/// Render a digest from the currently eligible content without persisting
/// anything.
#[instrument(skip_all)]
pub async fn preview_digest(
    pool: &Pool,
    cfg: &Config,
    store: &dyn ContentStore,
    now: DateTime<Utc>,
) -> Result<RenderedDigest, DigestError> {
    if !cfg.digest.is_active {
        return Err(DigestError::Inactive);
    }
    let criteria = SelectionCriteria::from_config(&cfg.digest);
    let selected = selector::select_eligible_mailings(pool, &criteria, now).await?;
    builder::build_digest(store, &cfg.digest, &selected.entity_ids_by_type, PREVIEW_DIGEST_ID)
        .await
}

/// Create and populate a new digest from the eligible mailings.
///
/// Returns `Ok(None)` when nothing is eligible. On a link failure the
/// freshly created digest stays in CREATED status with no links.
#[instrument(skip_all)]
pub async fn prepare_digest(
    pool: &Pool,
    cfg: &Config,
    now: DateTime<Utc>,
) -> Result<Option<i64>, DigestError> {
    if !cfg.digest.is_active {
        return Err(DigestError::Inactive);
    }
    let criteria = SelectionCriteria::from_config(&cfg.digest);
    let selected = selector::select_eligible_mailings(pool, &criteria, now).await?;
    if selected.is_empty() {
        info!("no eligible content, digest not prepared");
        return Ok(None);
    }

    let digest_id = db::create_digest(pool, now).await?;
    db::link_mailings_and_prepare(pool, digest_id, &selected.mailing_ids, now).await?;
    info!(
        digest_id,
        mailings = selected.mailing_ids.len(),
        "digest prepared"
    );
    Ok(Some(digest_id))
}

/// Re-render a previously prepared digest from its stored content links.
#[instrument(skip_all)]
pub async fn view_digest(
    pool: &Pool,
    cfg: &Config,
    store: &dyn ContentStore,
    digest_id: i64,
) -> Result<RenderedDigest, DigestError> {
    if db::digest_status(pool, digest_id).await?.is_none() {
        return Err(DigestError::NotFound(digest_id));
    }
    let content = db::digest_content(pool, digest_id).await?;
    builder::build_digest(store, &cfg.digest, &content, digest_id).await
}

/// All digests with status, creation time and sent-to groups.
pub async fn list_digests(pool: &Pool) -> Result<Vec<DigestSummary>, DigestError> {
    db::list_digests(pool).await
}
