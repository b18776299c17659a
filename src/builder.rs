//! Digest composition: entity loading, rendering and payload assembly.

use crate::config::DigestSettings;
use crate::db::Pool;
use crate::error::DigestError;
use crate::model::RenderedDigest;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;
use tracing::{instrument, warn};

/// Substituted by the downstream mailing system, passed through verbatim.
pub const UNSUBSCRIBE_TOKEN: &str = "{action.unsubscribeUrl}";

/// A loadable content entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntity {
    pub id: i64,
    pub entity_type_id: String,
    pub bundle: String,
    pub langcode: String,
    pub title: String,
    pub body: String,
}

/// Narrow seam over the host CMS content storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Load the entities with the given ids. Missing ids are simply
    /// absent from the result, they are not an error.
    async fn load_many(
        &self,
        entity_type_id: &str,
        ids: &[i64],
    ) -> Result<Vec<ContentEntity>, DigestError>;

    /// Render one entity in a named view mode.
    fn render(&self, entity: &ContentEntity, view_mode: &str) -> String;
}

/// Content store backed by the local `content` table.
#[derive(Debug, Clone)]
pub struct SqlContentStore {
    pool: Pool,
}

impl SqlContentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for SqlContentStore {
    async fn load_many(
        &self,
        entity_type_id: &str,
        ids: &[i64],
    ) -> Result<Vec<ContentEntity>, DigestError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, entity_type_id, bundle, langcode, title, body \
             FROM content WHERE entity_type_id = ",
        );
        query.push_bind(entity_type_id);
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        query.push(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut by_id: BTreeMap<i64, ContentEntity> = BTreeMap::new();
        for row in rows {
            let entity = ContentEntity {
                id: row.get("id"),
                entity_type_id: row.get("entity_type_id"),
                bundle: row.get("bundle"),
                langcode: row.get("langcode"),
                title: row.get("title"),
                body: row.get("body"),
            };
            by_id.insert(entity.id, entity);
        }
        // Preserve the caller's ordering.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn render(&self, entity: &ContentEntity, view_mode: &str) -> String {
        match view_mode {
            "full" => format!(
                "<article><h2>{}</h2><div>{}</div></article>",
                entity.title, entity.body
            ),
            // Any other view mode renders as a teaser.
            _ => {
                let teaser: String = entity.body.chars().take(200).collect();
                format!(
                    "<article><h2>{}</h2><p>{}</p></article>",
                    entity.title, teaser
                )
            }
        }
    }
}

/// Load and render the referenced entities, then compose the digest
/// payload.
///
/// An entity that fails to load (already deleted, for instance) is
/// skipped with a warning and never aborts the digest. Zero rendered
/// entities still produce a well-formed "no content" payload.
#[instrument(skip_all)]
pub async fn build_digest(
    store: &dyn ContentStore,
    settings: &DigestSettings,
    entity_ids_by_type: &BTreeMap<String, Vec<i64>>,
    digest_id: i64,
) -> Result<RenderedDigest, DigestError> {
    let mut fragments: Vec<String> = Vec::new();
    for (entity_type_id, ids) in entity_ids_by_type {
        let entities = store.load_many(entity_type_id, ids).await?;
        for id in ids {
            match entities.iter().find(|e| e.id == *id) {
                Some(entity) => fragments.push(store.render(entity, &settings.view_mode)),
                None => {
                    let missing = DigestError::EntityLoad {
                        entity_type_id: entity_type_id.clone(),
                        entity_id: *id,
                    };
                    warn!(%missing, "skipping digest entry");
                }
            }
        }
    }

    let title = digest_title(settings, digest_id);
    let permalink = permalink(settings, digest_id);
    let body_html = compose(&title, &fragments, &permalink);
    Ok(RenderedDigest {
        digest_id,
        title,
        body_html,
        permalink,
        entity_count: fragments.len(),
    })
}

pub fn digest_title(settings: &DigestSettings, digest_id: i64) -> String {
    format!("{} {}", settings.title, digest_id)
}

fn permalink(settings: &DigestSettings, digest_id: i64) -> String {
    format!(
        "{}/digest/{}",
        settings.base_url.trim_end_matches('/'),
        digest_id
    )
}

fn compose(title: &str, fragments: &[String], permalink: &str) -> String {
    let mut html = String::new();
    html.push_str(&format!("<h1>{title}</h1>\n"));
    html.push_str(&format!("<p><a href=\"{permalink}\">View it online</a></p>\n"));
    if fragments.is_empty() {
        html.push_str("<p>No content this week.</p>\n");
    } else {
        for fragment in fragments {
            html.push_str(fragment);
            html.push('\n');
        }
    }
    html.push_str(&format!("<p><a href=\"{UNSUBSCRIBE_TOKEN}\">Unsubscribe</a></p>\n"));
    html
}
