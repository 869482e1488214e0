//! Linkage and identity state shared by every entity kind.
//!
//! # Responsibility
//! - Hold the `(id, collection)` pair that makes a handle addressable.
//! - Provide the store-touching operations common to all kinds.
//!
//! # Invariants
//! - Nothing reaches the store unless the handle is linked and identified;
//!   the missing half is reported as `NotAccessible`.
//! - Copies share server-side state; a handle never caches document fields.
//! - `wipe` keeps the link and drops the id.

use crate::error::{AccessCause, EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::repo::CollectionHandle;
use crate::store::{
    Document, Filter, Timestamp, Update, CREATED_FIELD, LAST_MODIFIED_FIELD, OBJECT_TYPE_FIELD,
};
use log::debug;
use serde_json::Value;
use std::fmt::{Debug, Formatter};

pub(crate) const ANALYSIS_DISABLED_FIELD: &str = "analysis_disabled";
pub(crate) const EXPLORATION_DISABLED_FIELD: &str = "exploration_disabled";

/// `(id, collection)` pair behind every entity handle.
#[derive(Clone, Default)]
pub struct Object {
    id: Option<Identifier>,
    collection: Option<CollectionHandle>,
}

impl Object {
    pub fn new(id: Option<Identifier>, collection: Option<CollectionHandle>) -> Self {
        Self { id, collection }
    }

    pub fn id(&self) -> Option<Identifier> {
        self.id
    }

    pub fn collection(&self) -> Option<&CollectionHandle> {
        self.collection.as_ref()
    }

    fn access(&self, kind: EntityKind) -> EntityResult<(Identifier, &CollectionHandle)> {
        let collection = self
            .collection
            .as_ref()
            .ok_or_else(|| EntityError::not_accessible(kind, AccessCause::MissingCollection))?;
        let id = self
            .id
            .ok_or_else(|| EntityError::not_accessible(kind, AccessCause::MissingId))?;
        Ok((id, collection))
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("collection", &self.collection.as_ref().map(|c| c.name()))
            .finish()
    }
}

/// Linked and identified pair, or the reason the handle is not.
pub(crate) fn access<E: Entity>(entity: &E) -> EntityResult<(Identifier, &CollectionHandle)> {
    entity.object().access(E::KIND)
}

/// Reads the listed fields of `entity`'s document.
pub(crate) fn read<E: Entity>(entity: &E, fields: &[&str]) -> EntityResult<(Identifier, Document)> {
    let (id, collection) = access(entity)?;
    Ok((id, collection.read_fields(E::KIND, id, fields)?))
}

/// Applies `update` to `entity`'s document in one atomic call.
pub(crate) fn write<E: Entity>(entity: &E, update: &Update) -> EntityResult<()> {
    let (id, collection) = access(entity)?;
    collection.update_by_id(E::KIND, id, update)
}

/// Skeleton document shared by every kind at creation.
pub(crate) fn base_document(kind: EntityKind) -> Document {
    let mut document = Document::new();
    document.insert(OBJECT_TYPE_FIELD.to_string(), Value::from(kind));
    document.insert(ANALYSIS_DISABLED_FIELD.to_string(), Value::Bool(false));
    document.insert(EXPLORATION_DISABLED_FIELD.to_string(), Value::Bool(false));
    document
}

/// Inserts `document` through `entity`'s link and assigns the new id.
///
/// # Errors
/// - `NotAccessible` when unlinked.
/// - `Programming` when the entity already has an id.
pub(crate) fn create<E: Entity>(entity: &mut E, document: Document) -> EntityResult<Identifier> {
    let collection = entity
        .object()
        .collection()
        .cloned()
        .ok_or_else(|| EntityError::not_accessible(E::KIND, AccessCause::MissingCollection))?;
    if let Some(id) = entity.object().id() {
        return Err(EntityError::Programming {
            kind: E::KIND,
            message: format!("already identified as {id}; use field setters instead"),
        });
    }
    let id = collection.insert(document)?;
    entity.assign(id);
    debug!(
        "event=entity_create module=entity status=ok kind={} collection={} id={id}",
        E::KIND,
        collection.name()
    );
    Ok(id)
}

fn read_timestamp<E: Entity>(entity: &E, field: &str) -> EntityResult<Option<Timestamp>> {
    let (id, document) = read(entity, &[field])?;
    match document.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| EntityError::invalid_data(E::KIND, field, Some(id), "not a timestamp")),
    }
}

fn required_timestamp<E: Entity>(entity: &E, field: &str) -> EntityResult<Timestamp> {
    let (id, _) = access(entity)?;
    read_timestamp(entity, field)?.ok_or_else(|| EntityError::FieldNotSet {
        kind: E::KIND,
        field: field.to_string(),
        id,
    })
}

fn read_flag<E: Entity>(entity: &E, field: &str) -> EntityResult<bool> {
    let (_, document) = read(entity, &[field])?;
    Ok(document.get(field).and_then(Value::as_bool).unwrap_or(false))
}

/// Common contract of every entity kind.
///
/// Implementors provide the kind tag and access to their [`Object`]; every
/// other operation is derived.
pub trait Entity: Clone + Sized {
    const KIND: EntityKind;

    fn from_object(object: Object) -> Self;
    fn object(&self) -> &Object;
    fn object_mut(&mut self) -> &mut Object;

    /// Store filter selecting documents of this kind.
    fn kind_filter() -> Filter {
        Filter::eq(OBJECT_TYPE_FIELD, Self::KIND.as_str())
    }

    /// Whether `document` (projected to the kind fields) is of this kind.
    fn matches_kind(document: &Document) -> bool {
        document.get(OBJECT_TYPE_FIELD).and_then(Value::as_str) == Some(Self::KIND.as_str())
    }

    /// # Errors
    /// - `NotAccessible` with `MissingId` when unidentified.
    fn id(&self) -> EntityResult<Identifier> {
        self.object()
            .id()
            .ok_or_else(|| EntityError::not_accessible(Self::KIND, AccessCause::MissingId))
    }

    fn has_id(&self) -> bool {
        self.object().id().is_some()
    }

    fn assign(&mut self, id: Identifier) {
        self.object_mut().id = Some(id);
    }

    /// Binds to `collection`, replacing any previous link.
    fn link(&mut self, collection: CollectionHandle) {
        self.object_mut().collection = Some(collection);
    }

    fn detach(&mut self) {
        self.object_mut().collection = None;
    }

    fn has_link(&self) -> bool {
        self.object().collection().is_some()
    }

    fn collection(&self) -> EntityResult<CollectionHandle> {
        self.object().collection().cloned().ok_or_else(|| {
            EntityError::not_accessible(Self::KIND, AccessCause::MissingCollection)
        })
    }

    /// Whether the document still exists, without fetching it.
    fn exists(&self) -> EntityResult<bool> {
        let (id, collection) = access(self)?;
        collection.has(id)
    }

    /// Deletes the document and drops the id; the link is kept.
    ///
    /// # Errors
    /// - `NotFound` when `expect_presence` and nothing was deleted.
    fn wipe(&mut self, expect_presence: bool) -> EntityResult<()> {
        let (id, collection) = access(self)?;
        let deleted = collection.delete_by_id(id)?;
        if !deleted && expect_presence {
            return Err(EntityError::NotFound {
                kind: Self::KIND,
                id: Some(id),
            });
        }
        self.object_mut().id = None;
        Ok(())
    }

    /// The raw stored document as JSON text.
    fn json(&self) -> EntityResult<String> {
        let (id, collection) = access(self)?;
        let document = collection.read_document(Self::KIND, id)?;
        serde_json::to_string(&document)
            .map_err(|err| EntityError::invalid_data(Self::KIND, "document", Some(id), err))
    }

    /// Creation instant in Unix-epoch microseconds.
    fn created(&self) -> EntityResult<Timestamp> {
        required_timestamp(self, CREATED_FIELD)
    }

    /// Last-modification instant in Unix-epoch microseconds.
    fn last_modified(&self) -> EntityResult<Timestamp> {
        required_timestamp(self, LAST_MODIFIED_FIELD)
    }

    fn has_created_timestamp(&self) -> EntityResult<bool> {
        Ok(read_timestamp(self, CREATED_FIELD)?.is_some())
    }

    fn has_last_modified_timestamp(&self) -> EntityResult<bool> {
        Ok(read_timestamp(self, LAST_MODIFIED_FIELD)?.is_some())
    }

    /// Bumps the last-modified instant without changing any field.
    fn touch(&self) -> EntityResult<()> {
        write(self, &Update::new())
    }

    /// Compares creation (or last-modification) instants.
    fn older_than<O: Entity>(&self, other: &O, compare_creation: bool) -> EntityResult<bool> {
        let field = if compare_creation {
            CREATED_FIELD
        } else {
            LAST_MODIFIED_FIELD
        };
        let mine = required_timestamp(self, field)?;
        let theirs = required_timestamp(other, field)?;
        Ok(mine < theirs)
    }

    fn enable_analysis(&self) -> EntityResult<()> {
        write(self, &Update::new().set(ANALYSIS_DISABLED_FIELD, false))
    }

    fn disable_analysis(&self) -> EntityResult<()> {
        write(self, &Update::new().set(ANALYSIS_DISABLED_FIELD, true))
    }

    fn enable_exploration(&self) -> EntityResult<()> {
        write(self, &Update::new().set(EXPLORATION_DISABLED_FIELD, false))
    }

    fn disable_exploration(&self) -> EntityResult<()> {
        write(self, &Update::new().set(EXPLORATION_DISABLED_FIELD, true))
    }

    /// Whether analysis is enabled for this entity.
    fn analyze(&self) -> EntityResult<bool> {
        Ok(!read_flag(self, ANALYSIS_DISABLED_FIELD)?)
    }

    /// Whether exploration is enabled for this entity.
    fn explore(&self) -> EntityResult<bool> {
        Ok(!read_flag(self, EXPLORATION_DISABLED_FIELD)?)
    }
}

/// Inherent constructors shared by every kind.
macro_rules! entity_kind {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default)]
        pub struct $name {
            object: $crate::entity::object::Object,
        }

        impl $crate::entity::object::Entity for $name {
            const KIND: $crate::model::layout::EntityKind = $kind;

            fn from_object(object: $crate::entity::object::Object) -> Self {
                Self { object }
            }

            fn object(&self) -> &$crate::entity::object::Object {
                &self.object
            }

            fn object_mut(&mut self) -> &mut $crate::entity::object::Object {
                &mut self.object
            }
        }

        impl $name {
            /// Unlinked, unidentified handle.
            pub fn new() -> Self {
                Self::default()
            }

            /// Identified but unlinked handle.
            pub fn with_id(id: $crate::model::id::Identifier) -> Self {
                <Self as $crate::entity::object::Entity>::from_object(
                    $crate::entity::object::Object::new(Some(id), None),
                )
            }

            /// Linked handle to the document `id`.
            pub fn linked(
                id: $crate::model::id::Identifier,
                collection: $crate::repo::CollectionHandle,
            ) -> Self {
                <Self as $crate::entity::object::Entity>::from_object(
                    $crate::entity::object::Object::new(Some(id), Some(collection)),
                )
            }

            /// Linked, unidentified handle, ready for a `create` call.
            pub fn in_collection(collection: $crate::repo::CollectionHandle) -> Self {
                <Self as $crate::entity::object::Entity>::from_object(
                    $crate::entity::object::Object::new(None, Some(collection)),
                )
            }
        }
    };
}

pub(crate) use entity_kind;

