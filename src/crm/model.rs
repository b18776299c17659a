//! Wire types for the CRM mailing API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CreateMailingRequest<'a> {
    pub subject: &'a str,
    pub body_html: &'a str,
    pub from_contact_id: i64,
    pub recipient_group_ids: &'a [i64],
    /// True for test deliveries that must not create a campaign.
    pub is_test: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMailingResponse {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest<'a> {
    pub subject: &'a str,
    pub body_html: &'a str,
    pub contact_ids: &'a [i64],
}
