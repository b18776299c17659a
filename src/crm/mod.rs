//! External CRM mailing system client.

use crate::config::Crm;
use crate::error::DigestError;
use crate::model::RenderedDigest;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::crm::model::{CreateMailingRequest, CreateMailingResponse, NotificationRequest};

pub mod model;

fn rejected(digest_id: i64, reason: String) -> DigestError {
    DigestError::DispatchRejected { digest_id, reason }
}

/// Seam over the external mass-mailing system.
#[async_trait]
pub trait MailingSystem: Send + Sync {
    /// Hand a composed digest to the mailing system for delivery to the
    /// given recipient groups. Returns the external mailing id.
    async fn send(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<i64, DigestError>;

    /// Deliver the digest to the test groups without creating a campaign.
    async fn send_test(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<(), DigestError>;

    /// Ask the configured validators to review a prepared digest.
    async fn notify_validators(
        &self,
        payload: &RenderedDigest,
        contact_ids: &[i64],
    ) -> Result<(), DigestError>;
}

/// JSON REST client for the CRM mailing API.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpMailer {
    pub fn from_config(crm: &Crm) -> Result<Self, DigestError> {
        let base_url = Url::parse(&crm.base_url)
            .map_err(|err| rejected(0, format!("invalid crm.base_url: {err}")))?;
        Ok(Self::with_base_url(base_url, crm.api_key.clone()))
    }

    pub fn with_base_url(base_url: Url, api_key: String) -> Self {
        let http = Client::builder()
            .user_agent("mail-digest/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
        }
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        digest_id: i64,
        body: &Req,
    ) -> Result<Resp, DigestError> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|err| rejected(digest_id, format!("invalid endpoint {path}: {err}")))?;
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| rejected(digest_id, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(rejected(digest_id, format!("{status}: {detail}")));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|err| rejected(digest_id, format!("malformed response: {err}")))
    }
}

#[async_trait]
impl MailingSystem for HttpMailer {
    async fn send(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<i64, DigestError> {
        let request = CreateMailingRequest {
            subject: &payload.title,
            body_html: &payload.body_html,
            from_contact_id: from_contact,
            recipient_group_ids: group_ids,
            is_test: false,
        };
        let response: CreateMailingResponse = self
            .post_json("api/v3/mailings", payload.digest_id, &request)
            .await?;
        info!(
            digest_id = payload.digest_id,
            crm_mailing_id = response.id,
            "digest accepted by mailing system"
        );
        Ok(response.id)
    }

    async fn send_test(
        &self,
        payload: &RenderedDigest,
        from_contact: i64,
        group_ids: &[i64],
    ) -> Result<(), DigestError> {
        let request = CreateMailingRequest {
            subject: &payload.title,
            body_html: &payload.body_html,
            from_contact_id: from_contact,
            recipient_group_ids: group_ids,
            is_test: true,
        };
        let _: CreateMailingResponse = self
            .post_json("api/v3/mailings", payload.digest_id, &request)
            .await?;
        Ok(())
    }

    async fn notify_validators(
        &self,
        payload: &RenderedDigest,
        contact_ids: &[i64],
    ) -> Result<(), DigestError> {
        let request = NotificationRequest {
            subject: &payload.title,
            body_html: &payload.body_html,
            contact_ids,
        };
        let _: serde_json::Value = self
            .post_json("api/v3/notifications", payload.digest_id, &request)
            .await?;
        Ok(())
    }
}
