//! Error taxonomy for collection, entity and manager operations.
//!
//! # Responsibility
//! - Give every failure enough context (kind, field, id) to reconstruct
//!   the failing call.
//! - Map store transport errors onto the infrastructure variants.
//!
//! # Invariants
//! - Precondition failures (`NotAccessible`, `Validation`, `Programming`)
//!   are raised before any store round trip.
//! - Nothing in the core retries; every variant surfaces to the caller.

use crate::model::descriptor::ModelConflict;
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::store::{CursorId, StoreError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EntityResult<T> = Result<T, EntityError>;

/// Which half of the (linked, identified) precondition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCause {
    MissingCollection,
    MissingId,
}

impl Display for AccessCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCollection => f.write_str("no linked collection"),
            Self::MissingId => f.write_str("no identifier"),
        }
    }
}

#[derive(Debug)]
pub enum EntityError {
    NotAccessible {
        kind: EntityKind,
        cause: AccessCause,
    },
    NotFound {
        kind: EntityKind,
        id: Option<Identifier>,
    },
    FieldNotSet {
        kind: EntityKind,
        field: String,
        id: Identifier,
    },
    Validation {
        kind: EntityKind,
        field: String,
        message: String,
    },
    ModelConflict(ModelConflict),
    /// API misuse, e.g. creating an entity that already has an id.
    Programming {
        kind: EntityKind,
        message: String,
    },
    ObjectTypeMismatch {
        expected: EntityKind,
        found: String,
        id: Identifier,
    },
    SelfDuplicate {
        id: Identifier,
    },
    DuplicateCycle {
        id: Identifier,
        hops: usize,
    },
    /// A field holds a shape other than the one requested.
    FieldMismatch {
        kind: EntityKind,
        field: String,
        id: Identifier,
        message: String,
    },
    CollectionUnavailable {
        collection: String,
    },
    StoreUnavailable(String),
    CursorExpired {
        cursor: CursorId,
    },
    InvalidData {
        kind: Option<EntityKind>,
        field: String,
        id: Option<Identifier>,
        message: String,
    },
    Config(String),
    Store(StoreError),
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAccessible { kind, cause } => write!(f, "{kind} is not accessible: {cause}"),
            Self::NotFound { kind, id: Some(id) } => write!(f, "{kind} {id} not found"),
            Self::NotFound { kind, id: None } => write!(f, "no matching {kind} found"),
            Self::FieldNotSet { kind, field, id } => {
                write!(f, "field `{field}` of {kind} {id} is not set")
            }
            Self::Validation {
                kind,
                field,
                message,
            } => write!(f, "invalid value for `{field}` of {kind}: {message}"),
            Self::ModelConflict(conflict) => write!(f, "{conflict}"),
            Self::Programming { kind, message } => write!(f, "invalid use of {kind}: {message}"),
            Self::ObjectTypeMismatch {
                expected,
                found,
                id,
            } => write!(f, "document {id} is a `{found}`, expected `{expected}`"),
            Self::SelfDuplicate { id } => write!(f, "structure {id} cannot be its own original"),
            Self::DuplicateCycle { id, hops } => write!(
                f,
                "duplicate chain starting at structure {id} does not terminate after {hops} hops"
            ),
            Self::FieldMismatch {
                kind,
                field,
                id,
                message,
            } => write!(f, "field `{field}` of {kind} {id}: {message}"),
            Self::CollectionUnavailable { collection } => {
                write!(f, "collection `{collection}` is unavailable")
            }
            Self::StoreUnavailable(message) => write!(f, "store unavailable: {message}"),
            Self::CursorExpired { cursor } => write!(f, "cursor {cursor} expired"),
            Self::InvalidData {
                kind,
                field,
                id,
                message,
            } => {
                write!(f, "invalid persisted `{field}`")?;
                if let Some(kind) = kind {
                    write!(f, " of {kind}")?;
                }
                if let Some(id) = id {
                    write!(f, " {id}")?;
                }
                write!(f, ": {message}")
            }
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EntityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ModelConflict(conflict) => Some(conflict),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EntityError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::CollectionUnavailable(collection) => Self::CollectionUnavailable { collection },
            StoreError::Unavailable(message) => Self::StoreUnavailable(message),
            StoreError::CursorExpired(cursor) => Self::CursorExpired { cursor },
            other => Self::Store(other),
        }
    }
}

impl From<ModelConflict> for EntityError {
    fn from(value: ModelConflict) -> Self {
        Self::ModelConflict(value)
    }
}

impl EntityError {
    pub(crate) fn not_accessible(kind: EntityKind, cause: AccessCause) -> Self {
        Self::NotAccessible { kind, cause }
    }

    pub(crate) fn validation(
        kind: EntityKind,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_data(
        kind: impl Into<Option<EntityKind>>,
        field: impl Into<String>,
        id: Option<Identifier>,
        message: impl Display,
    ) -> Self {
        Self::InvalidData {
            kind: kind.into(),
            field: field.into(),
            id,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessCause, EntityError};
    use crate::model::id::Identifier;
    use crate::model::layout::EntityKind;
    use crate::store::StoreError;

    #[test]
    fn store_errors_map_to_infrastructure_variants() {
        let mapped = EntityError::from(StoreError::CollectionUnavailable("flasks".to_string()));
        assert!(matches!(mapped, EntityError::CollectionUnavailable { collection } if collection == "flasks"));

        let mapped = EntityError::from(StoreError::Unavailable("closed".to_string()));
        assert!(matches!(mapped, EntityError::StoreUnavailable(_)));

        let mapped = EntityError::from(StoreError::CursorExpired(7));
        assert!(matches!(mapped, EntityError::CursorExpired { cursor: 7 }));
    }

    #[test]
    fn messages_carry_kind_field_and_id() {
        let id = Identifier::generate();
        let err = EntityError::FieldNotSet {
            kind: EntityKind::Calculation,
            field: "runtime".to_string(),
            id,
        };
        let message = err.to_string();
        assert!(message.contains("runtime"));
        assert!(message.contains("calculation"));
        assert!(message.contains(&id.to_string()));

        let err = EntityError::not_accessible(EntityKind::Structure, AccessCause::MissingId);
        assert_eq!(err.to_string(), "structure is not accessible: no identifier");
    }
}
