//! Periodic content digest over a mailing log.
//!
//! Content items mailed individually through the CRM leave a row in the
//! mailing log. This crate selects the recent, not-yet-digested mailings,
//! bundles them into a digest record, renders the referenced content into
//! one composed mailing and hands it to the external CRM mailing system,
//! under a weekly cron-style time gate.

pub mod builder;
pub mod clock;
pub mod config;
pub mod crm;
pub mod db;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod selector;
