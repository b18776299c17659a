use super::model::DigestSummary;
use crate::error::DigestError;
use crate::model::{DigestStatus, MailingRecord};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool, DigestError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<(), DigestError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

/// Append one row to the mailing log. Called by the send-mailing path;
/// the digest subsystem itself never updates or deletes these rows.
#[instrument(skip_all)]
pub async fn insert_mailing_record(pool: &Pool, rec: &MailingRecord) -> Result<i64, DigestError> {
    let row = sqlx::query(
        "INSERT INTO entity_mailing (mailing_id, entity_type_id, entity_id, entity_bundle, langcode, sent_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(rec.mailing_id)
    .bind(&rec.entity_type_id)
    .bind(rec.entity_id)
    .bind(&rec.entity_bundle)
    .bind(&rec.langcode)
    .bind(rec.sent_at)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Insert a new digest with status CREATED and return its id.
#[instrument(skip_all)]
pub async fn create_digest(pool: &Pool, now: DateTime<Utc>) -> Result<i64, DigestError> {
    let row = sqlx::query("INSERT INTO digest (status, created_at) VALUES (?, ?) RETURNING id")
        .bind(DigestStatus::Created.as_str())
        .bind(now)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

/// Link the selected mailings to a digest and mark it PREPARED.
///
/// Runs in one transaction: if any link insert fails the links roll back
/// and the digest keeps its CREATED status.
#[instrument(skip_all)]
pub async fn link_mailings_and_prepare(
    pool: &Pool,
    digest_id: i64,
    mailing_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<(), DigestError> {
    let mut tx = pool.begin().await?;
    for mailing_id in mailing_ids {
        insert_link_tx(&mut tx, digest_id, *mailing_id, now).await?;
    }
    sqlx::query("UPDATE digest SET status = ? WHERE id = ?")
        .bind(DigestStatus::Prepared.as_str())
        .bind(digest_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn insert_link_tx(
    tx: &mut Transaction<'_, Sqlite>,
    digest_id: i64,
    mailing_id: i64,
    linked_at: DateTime<Utc>,
) -> Result<(), DigestError> {
    sqlx::query("INSERT INTO digest_mailing (digest_id, mailing_id, linked_at) VALUES (?, ?, ?)")
        .bind(digest_id)
        .bind(mailing_id)
        .bind(linked_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Unconditional status overwrite.
#[instrument(skip_all)]
pub async fn set_status(
    pool: &Pool,
    digest_id: i64,
    status: DigestStatus,
) -> Result<(), DigestError> {
    sqlx::query("UPDATE digest SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(digest_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn digest_status(
    pool: &Pool,
    digest_id: i64,
) -> Result<Option<DigestStatus>, DigestError> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM digest WHERE id = ?")
        .bind(digest_id)
        .fetch_optional(pool)
        .await?;
    Ok(status.and_then(|s| DigestStatus::parse_status(&s)))
}

/// Persist the external mailing id returned by the CRM for a sent digest.
#[instrument(skip_all)]
pub async fn set_crm_mailing_id(
    pool: &Pool,
    digest_id: i64,
    crm_mailing_id: i64,
) -> Result<(), DigestError> {
    sqlx::query("UPDATE digest SET crm_mailing_id = ? WHERE id = ?")
        .bind(crm_mailing_id)
        .bind(digest_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the recipient groups a digest was sent to. Group assignment
/// happens at send time only.
#[instrument(skip_all)]
pub async fn record_sent_groups(
    pool: &Pool,
    digest_id: i64,
    group_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<(), DigestError> {
    let mut tx = pool.begin().await?;
    for group_id in group_ids {
        sqlx::query("INSERT INTO digest_group (digest_id, group_id, sent_at) VALUES (?, ?, ?)")
            .bind(digest_id)
            .bind(group_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// List all digests with status, creation time and sent-to groups.
/// The group join is an outer join: non-sent digests have no groups.
#[instrument(skip_all)]
pub async fn list_digests(pool: &Pool) -> Result<Vec<DigestSummary>, DigestError> {
    let rows = sqlx::query(
        "SELECT d.id, d.status, d.created_at, g.group_id \
         FROM digest d \
         LEFT JOIN digest_group g ON g.digest_id = d.id \
         ORDER BY d.id ASC, g.group_id ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut summaries: Vec<DigestSummary> = Vec::new();
    for row in rows {
        let digest_id: i64 = row.get("id");
        let status_str: String = row.get("status");
        let status = DigestStatus::parse_status(&status_str).ok_or(sqlx::Error::Decode(
            format!("unknown digest status {status_str}").into(),
        ))?;
        let group_id: Option<i64> = row.try_get("group_id").unwrap_or(None);
        match summaries.last_mut() {
            Some(last) if last.digest_id == digest_id => {
                if let Some(gid) = group_id {
                    last.group_ids.push(gid);
                }
            }
            _ => summaries.push(DigestSummary {
                digest_id,
                status,
                created_at: row.get("created_at"),
                group_ids: group_id.into_iter().collect(),
            }),
        }
    }
    Ok(summaries)
}

/// Recover the content entity ids bundled into a previously prepared
/// digest, grouped by entity type, for re-rendering on view.
#[instrument(skip_all)]
pub async fn digest_content(
    pool: &Pool,
    digest_id: i64,
) -> Result<BTreeMap<String, Vec<i64>>, DigestError> {
    let rows = sqlx::query(
        "SELECT em.entity_type_id, em.entity_id \
         FROM digest_mailing dm \
         JOIN entity_mailing em ON em.mailing_id = dm.mailing_id \
         WHERE dm.digest_id = ? \
         ORDER BY em.sent_at DESC",
    )
    .bind(digest_id)
    .fetch_all(pool)
    .await?;

    let mut content: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for row in rows {
        let entity_type_id: String = row.get("entity_type_id");
        let entity_id: i64 = row.get("entity_id");
        let ids = content.entry(entity_type_id).or_default();
        if !ids.contains(&entity_id) {
            ids.push(entity_id);
        }
    }
    Ok(content)
}

/// Creation timestamp of the most recent digest, whatever its status.
/// Drives the weekly scheduler guard.
#[instrument(skip_all)]
pub async fn last_digest_timestamp(pool: &Pool) -> Result<Option<DateTime<Utc>>, DigestError> {
    let ts: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT created_at FROM digest ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    Ok(ts)
}

/// Count of all digest rows; used by tests asserting zero-write no-ops.
pub async fn count_digests(pool: &Pool) -> Result<i64, DigestError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digest")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Count of digest-mailing links for one digest.
pub async fn count_links(pool: &Pool, digest_id: i64) -> Result<i64, DigestError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digest_mailing WHERE digest_id = ?")
        .bind(digest_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
