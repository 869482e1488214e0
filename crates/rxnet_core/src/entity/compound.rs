//! Compound: structures considered one chemical species.
//!
//! # Invariants
//! - The first member structure is the centroid.

use crate::entity::field::{list_fields, ListField};
use crate::entity::object::{access, base_document, create, entity_kind, Entity};
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::repo::CollectionHandle;
use crate::store::Document;
use serde_json::Value;

entity_kind! {
    /// Handle to a document in the compounds collection.
    Compound => EntityKind::Compound
}

list_fields!(Compound {
    "structures": Identifier => has_structures, get_structures, set_structures, add_structure,
        remove_structure, has_structure, clear_structures;
    "reactions": Identifier => has_reactions, get_reactions, set_reactions, add_reaction,
        remove_reaction, has_reaction, clear_reactions;
});

/// Aggregate document with `structures` and empty `reactions`.
pub(crate) fn aggregate_document(kind: EntityKind, structures: &[Identifier]) -> Document {
    let mut document = base_document(kind);
    document.insert(
        "structures".to_string(),
        Value::Array(structures.iter().copied().map(Value::from).collect()),
    );
    document.insert("reactions".to_string(), Value::Array(Vec::new()));
    document
}

/// First entry of an aggregate's `structures` list.
pub(crate) fn centroid<E: Entity>(aggregate: &E) -> EntityResult<Identifier> {
    let (id, _) = access(aggregate)?;
    ListField::<Identifier>::new("structures")
        .get_at(aggregate, 0)?
        .ok_or_else(|| EntityError::FieldNotSet {
            kind: E::KIND,
            field: "structures".to_string(),
            id,
        })
}

impl Compound {
    pub fn create(&mut self, structures: &[Identifier]) -> EntityResult<Identifier> {
        create(self, aggregate_document(EntityKind::Compound, structures))
    }

    pub fn make(structures: &[Identifier], collection: CollectionHandle) -> EntityResult<Self> {
        let mut compound = Self::in_collection(collection);
        compound.create(structures)?;
        Ok(compound)
    }

    /// Representative structure.
    ///
    /// # Errors
    /// - `FieldNotSet` when the compound has no structures.
    pub fn get_centroid(&self) -> EntityResult<Identifier> {
        centroid(self)
    }
}
