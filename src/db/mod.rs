//! Database module: digest store and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `mail_digest::db` — we re-export the
//! repository API and the view models for convenience.

pub mod model;
pub mod repo;

pub use model::DigestSummary;
pub use repo::*;
