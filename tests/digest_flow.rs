use chrono::{DateTime, Duration, TimeZone, Utc};
use mail_digest::builder::SqlContentStore;
use mail_digest::crm::MailingSystem;
use mail_digest::db;
use mail_digest::digest;
use mail_digest::dispatch;
use mail_digest::error::DigestError;
use mail_digest::model::{DigestStatus, MailingRecord, RenderedDigest};
use mail_digest::selector::{self, SelectionCriteria};
use mail_digest::{config, config::Config};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> db::Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn load_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

fn now() -> DateTime<Utc> {
    // 2023-11-17 10:00 UTC, a Friday.
    Utc.with_ymd_and_hms(2023, 11, 17, 10, 0, 0).unwrap()
}

fn days_ago(days: i64) -> DateTime<Utc> {
    now() - Duration::days(days)
}

async fn seed_content(pool: &db::Pool, id: i64, title: &str) {
    sqlx::query(
        "INSERT INTO content (id, entity_type_id, bundle, langcode, title, body) \
         VALUES (?, 'node', 'article', 'en', ?, 'body text')",
    )
    .bind(id)
    .bind(title)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_mailing(pool: &db::Pool, mailing_id: i64, entity_id: i64, sent_at: DateTime<Utc>) {
    db::insert_mailing_record(
        pool,
        &MailingRecord {
            mailing_id,
            entity_type_id: "node".into(),
            entity_id,
            entity_bundle: "article".into(),
            langcode: "en".into(),
            sent_at,
        },
    )
    .await
    .unwrap();
}

#[derive(Debug, Clone)]
struct SendCall {
    digest_id: i64,
    from_contact: i64,
    group_ids: Vec<i64>,
    is_test: bool,
}

#[derive(Clone, Default)]
struct RecordingMailer {
    send_responses: Arc<Mutex<VecDeque<Result<i64, String>>>>,
    send_calls: Arc<Mutex<Vec<SendCall>>>,
    notify_calls: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl RecordingMailer {
    fn with_send_responses(responses: Vec<Result<i64, String>>) -> Self {
        Self {
            send_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn pop_response(&self, digest_id: i64) -> Result<i64, DigestError> {
        let mut guard = self.send_responses.lock().await;
        match guard.pop_front().unwrap_or(Ok(9000)) {
            Ok(id) => Ok(id),
            Err(reason) => Err(DigestError::DispatchRejected { digest_id, reason }),
        }
    }

    async fn send_calls(&self) -> Vec<SendCall> {
        self.send_calls.lock().await.clone()
    }

    async fn notify_calls(&self) -> Vec<Vec<i64>> {
        self.notify_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl MailingSystem for RecordingMailer {
    async fn send(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<i64, DigestError> {
        self.send_calls.lock().await.push(SendCall {
            digest_id: payload.digest_id,
            from_contact,
            group_ids: group_ids.to_vec(),
            is_test: false,
        });
        self.pop_response(payload.digest_id).await
    }

    async fn send_test(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<(), DigestError> {
        self.send_calls.lock().await.push(SendCall {
            digest_id: payload.digest_id,
            from_contact,
            group_ids: group_ids.to_vec(),
            is_test: true,
        });
        self.pop_response(payload.digest_id).await.map(|_| ())
    }

    async fn notify_validators(
        &self,
        _payload: &RenderedDigest,
        contact_ids: &[i64],
    ) -> Result<(), DigestError> {
        self.notify_calls.lock().await.push(contact_ids.to_vec());
        Ok(())
    }
}

#[tokio::test]
async fn prepare_then_send_full_flow() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::with_send_responses(vec![Ok(777)]);

    seed_content(&pool, 1, "First article").await;
    seed_content(&pool, 2, "Second article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;
    seed_mailing(&pool, 101, 2, days_ago(3)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .expect("content was eligible");
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Prepared)
    );

    let crm_id = dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap();
    assert_eq!(crm_id, 777);
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Sent)
    );

    let calls = mailer.send_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].digest_id, digest_id);
    assert_eq!(calls[0].from_contact, 1);
    assert_eq!(calls[0].group_ids, vec![12]);
    assert!(!calls[0].is_test);

    // Group assignment happened at send time.
    let digests = digest::list_digests(&pool).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].group_ids, vec![12]);

    // Linked mailings never come back from the selector.
    let criteria = SelectionCriteria::from_config(&cfg.digest);
    let selected = selector::select_eligible_mailings(&pool, &criteria, now())
        .await
        .unwrap();
    assert!(selected.is_empty());
}

#[tokio::test]
async fn sent_digest_cannot_be_sent_again() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::default();

    seed_content(&pool, 1, "Article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .unwrap();
    dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap();

    let err = dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::InvalidState { .. }));

    // No mutation: still SENT, still a single send call and group row.
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Sent)
    );
    assert_eq!(mailer.send_calls().await.len(), 1);
    let digests = digest::list_digests(&pool).await.unwrap();
    assert_eq!(digests[0].group_ids, vec![12]);
}

#[tokio::test]
async fn rejected_send_marks_failed_and_is_retryable() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer =
        RecordingMailer::with_send_responses(vec![Err("mailing refused".into()), Ok(555)]);

    seed_content(&pool, 1, "Article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .unwrap();

    let err = dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::DispatchRejected { .. }));
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Failed)
    );

    // FAILED digests allow another attempt.
    let crm_id = dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap();
    assert_eq!(crm_id, 555);
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Sent)
    );
}

#[tokio::test]
async fn created_digest_cannot_be_sent() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::default();

    let digest_id = db::create_digest(&pool, now()).await.unwrap();
    let err = dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DigestError::InvalidState {
            status: DigestStatus::Created,
            ..
        }
    ));
    assert!(mailer.send_calls().await.is_empty());
}

#[tokio::test]
async fn inactive_feature_is_a_guarded_no_op() {
    let pool = setup_pool().await;
    let mut cfg = load_config();
    cfg.digest.is_active = false;
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::default();

    assert!(matches!(
        digest::prepare_digest(&pool, &cfg, now()).await,
        Err(DigestError::Inactive)
    ));
    assert!(matches!(
        digest::preview_digest(&pool, &cfg, &store, now()).await,
        Err(DigestError::Inactive)
    ));
    assert!(matches!(
        dispatch::send_digest(&pool, &cfg, &store, &mailer, 1, now()).await,
        Err(DigestError::Inactive)
    ));
    assert_eq!(db::count_digests(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn view_rerenders_stored_content() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());

    seed_content(&pool, 1, "Kept article").await;
    seed_content(&pool, 2, "Deleted later").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;
    seed_mailing(&pool, 101, 2, days_ago(2)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .unwrap();

    // Entity 2 disappears between prepare and view; the digest still
    // renders with the remaining entity.
    sqlx::query("DELETE FROM content WHERE id = 2")
        .execute(&pool)
        .await
        .unwrap();

    let rendered = digest::view_digest(&pool, &cfg, &store, digest_id)
        .await
        .unwrap();
    assert_eq!(rendered.digest_id, digest_id);
    assert_eq!(rendered.entity_count, 1);
    assert!(rendered.body_html.contains("Kept article"));
    assert!(rendered
        .permalink
        .ends_with(&format!("/digest/{digest_id}")));

    let err = digest::view_digest(&pool, &cfg, &store, 999).await.unwrap_err();
    assert!(matches!(err, DigestError::NotFound(999)));
}

#[tokio::test]
async fn preview_renders_without_persisting() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());

    seed_content(&pool, 1, "Preview article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;

    let rendered = digest::preview_digest(&pool, &cfg, &store, now())
        .await
        .unwrap();
    assert_eq!(rendered.digest_id, digest::PREVIEW_DIGEST_ID);
    assert!(rendered.body_html.contains("Preview article"));
    assert_eq!(db::count_digests(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_uses_test_groups_and_keeps_status() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::default();

    seed_content(&pool, 1, "Article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .unwrap();
    dispatch::send_test_digest(&pool, &cfg, &store, &mailer, digest_id)
        .await
        .unwrap();

    let calls = mailer.send_calls().await;
    assert_eq!(calls.len(), 1);
    assert!(calls[0].is_test);
    assert_eq!(calls[0].group_ids, vec![99]);
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Prepared)
    );
}

#[tokio::test]
async fn notify_validators_targets_validation_contacts() {
    let pool = setup_pool().await;
    let cfg = load_config();
    let store = SqlContentStore::new(pool.clone());
    let mailer = RecordingMailer::default();

    seed_content(&pool, 1, "Article").await;
    seed_mailing(&pool, 100, 1, days_ago(1)).await;

    let digest_id = digest::prepare_digest(&pool, &cfg, now())
        .await
        .unwrap()
        .unwrap();
    dispatch::notify_validators(&pool, &cfg, &store, &mailer, digest_id)
        .await
        .unwrap();

    assert_eq!(mailer.notify_calls().await, vec![vec![7]]);
    assert_eq!(
        db::digest_status(&pool, digest_id).await.unwrap(),
        Some(DigestStatus::Prepared)
    );
}
