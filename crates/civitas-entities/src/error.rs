//! Error types for the civitas-entities crate.

use civitas_types::{EntityId, EntityKind, EntityState};

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The subtype does not exist for the requested kind.
    #[error("invalid subtype {subtype:?} for kind {kind}")]
    InvalidSubtype {
        /// The requested kind.
        kind: EntityKind,
        /// The subtype as given by the caller.
        subtype: String,
    },

    /// No live entity has this id (never issued, or destroyed).
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// The requested state cannot be set directly.
    #[error("entity {id} cannot transition to {to:?}")]
    InvalidTransition {
        /// The entity.
        id: EntityId,
        /// The rejected target state.
        to: EntityState,
    },

    /// The id space is exhausted.
    #[error("entity id space exhausted")]
    IdExhausted,
}
