//! Eligibility selection over the mailing log.

use crate::config::DigestSettings;
use crate::db::Pool;
use crate::error::DigestError;
use crate::model::SelectedContent;
use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};

/// Normalized selection inputs. Built from configuration once; the
/// checkbox-map bundle encoding never reaches this struct.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub entity_type: String,
    pub language: String,
    pub bundles: Vec<String>,
    pub quantity_limit: u32,
    pub max_age_in_days: u32,
    pub include_update: bool,
}

impl SelectionCriteria {
    pub fn from_config(settings: &DigestSettings) -> Self {
        Self {
            entity_type: settings.entity_type.clone(),
            language: settings.language.clone(),
            bundles: settings.selected_bundles(),
            quantity_limit: settings.quantity_limit,
            max_age_in_days: settings.max_age_in_days,
            include_update: settings.include_update,
        }
    }
}

/// Select the mailings eligible for the next digest.
///
/// Filters the mailing log to rows newer than `now - max_age_in_days`,
/// matching the supported entity type, an allowed bundle and the
/// configured language, excluding every mailing already linked to any
/// digest. Newest first, truncated to `quantity_limit`.
///
/// An empty bundle allow-list yields an empty result without querying;
/// there is no implicit "all bundles" fallback.
#[instrument(skip_all)]
pub async fn select_eligible_mailings(
    pool: &Pool,
    criteria: &SelectionCriteria,
    now: DateTime<Utc>,
) -> Result<SelectedContent, DigestError> {
    if criteria.bundles.is_empty() {
        debug!("no bundles selected, nothing eligible");
        return Ok(SelectedContent::default());
    }
    if criteria.include_update {
        // Reserved: superseding previously digested content with a newer
        // mailing of the same entity is not implemented yet.
        debug!("include_update is set but has no effect");
    }

    let cutoff = now - Duration::days(i64::from(criteria.max_age_in_days));

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT mailing_id, entity_type_id, entity_id FROM entity_mailing WHERE sent_at > ",
    );
    query.push_bind(cutoff);
    query.push(" AND entity_type_id = ");
    query.push_bind(&criteria.entity_type);
    query.push(" AND entity_bundle IN (");
    let mut bundles = query.separated(", ");
    for bundle in &criteria.bundles {
        bundles.push_bind(bundle);
    }
    query.push(") AND langcode = ");
    query.push_bind(&criteria.language);
    query.push(" AND mailing_id NOT IN (SELECT mailing_id FROM digest_mailing)");
    query.push(" ORDER BY sent_at DESC LIMIT ");
    query.push_bind(i64::from(criteria.quantity_limit));

    let rows = query.build().fetch_all(pool).await?;

    let mut selected = SelectedContent::default();
    for row in rows {
        let mailing_id: i64 = row.get("mailing_id");
        let entity_type_id: String = row.get("entity_type_id");
        let entity_id: i64 = row.get("entity_id");

        selected.mailing_ids.push(mailing_id);
        let ids = selected.entity_ids_by_type.entry(entity_type_id).or_default();
        // An entity mailed twice in the window contributes both mailings
        // but renders once.
        if !ids.contains(&entity_id) {
            ids.push(entity_id);
        }
    }
    debug!(
        mailings = selected.mailing_ids.len(),
        "eligible content selected"
    );
    Ok(selected)
}
