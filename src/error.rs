//! Error taxonomy for the digest core.

use crate::model::DigestStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    /// The digest feature is switched off in configuration. Callers treat
    /// this as a guarded no-op rather than a fault.
    #[error("digest feature is disabled")]
    Inactive,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A referenced content entity is missing or unloadable. Recoverable:
    /// the builder skips the entity and continues.
    #[error("entity {entity_type_id}/{entity_id} could not be loaded")]
    EntityLoad {
        entity_type_id: String,
        entity_id: i64,
    },

    /// The external mailing system refused the payload or was unreachable.
    #[error("mailing system rejected digest {digest_id}: {reason}")]
    DispatchRejected { digest_id: i64, reason: String },

    /// A send was attempted on a digest whose status forbids it.
    #[error("digest {digest_id} cannot be sent from status {status}")]
    InvalidState {
        digest_id: i64,
        status: DigestStatus,
    },

    #[error("digest {0} not found")]
    NotFound(i64),
}
