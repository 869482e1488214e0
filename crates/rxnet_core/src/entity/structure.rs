//! Structure: one atomic geometry and its indices into results.
//!
//! # Responsibility
//! - Persist geometry, charge, multiplicity, model and label.
//! - Index property and calculation ids by free-text label.
//! - Resolve the owning aggregate, following duplicate back-references.
//!
//! # Invariants
//! - A structure is never recorded as a duplicate of itself.
//! - Recursive aggregate lookup visits each structure at most once and
//!   gives up after `MAX_DUPLICATE_HOPS`.

use crate::entity::field::{map_fields, scalar_fields, Field, KeyedListField};
use crate::entity::object::{access, base_document, create, entity_kind, read, Entity};
use crate::error::{EntityError, EntityResult};
use crate::model::descriptor::ModelDescriptor;
use crate::model::id::Identifier;
use crate::model::layout::{EntityKind, StructureLabel};
use crate::model::payload::AtomCollection;
use crate::repo::CollectionHandle;
use crate::store::document::get_dotted;
use crate::store::Filter;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

const AGGREGATE: &str = "aggregate";
const DUPLICATE_OF: &str = "duplicate_of";
const PROPERTIES: KeyedListField<Identifier> = KeyedListField::new("properties");
const CALCULATIONS: KeyedListField<Identifier> = KeyedListField::new("calculations");

/// Longest `duplicate_of` chain followed by a recursive aggregate lookup.
pub const MAX_DUPLICATE_HOPS: usize = 64;

entity_kind! {
    /// Handle to a document in the structures collection.
    Structure => EntityKind::Structure
}

scalar_fields!(Structure {
    "atoms": AtomCollection => has_atoms, get_atoms, set_atoms, clear_atoms;
    "charge": i32 => has_charge, get_charge, set_charge, clear_charge;
    "multiplicity": i32 => has_multiplicity, get_multiplicity, set_multiplicity, clear_multiplicity;
    "model": ModelDescriptor => has_model, get_model, set_model, clear_model;
    "label": StructureLabel => has_label, get_label, set_label, clear_label;
    "comment": String => has_comment, get_comment, set_comment, clear_comment;
});

map_fields!(Structure {
    "graphs": String => has_graphs, has_graph, get_graph, set_graph, remove_graph,
        get_graphs, set_graphs, clear_graphs;
});

impl Structure {
    /// Creates the document with the `guess` model and label `none`.
    pub fn create(
        &mut self,
        atoms: &AtomCollection,
        charge: i32,
        multiplicity: i32,
    ) -> EntityResult<Identifier> {
        let model = ModelDescriptor::new("guess", "", "").with_spin_mode("any");
        self.create_with(atoms, charge, multiplicity, &model, StructureLabel::None)
    }

    pub fn create_with(
        &mut self,
        atoms: &AtomCollection,
        charge: i32,
        multiplicity: i32,
        model: &ModelDescriptor,
        label: StructureLabel,
    ) -> EntityResult<Identifier> {
        let mut document = base_document(EntityKind::Structure);
        let encode = |field: &str, value: serde_json::Result<Value>| {
            value.map_err(|err| EntityError::invalid_data(EntityKind::Structure, field, None, err))
        };
        document.insert("atoms".to_string(), encode("atoms", serde_json::to_value(atoms))?);
        document.insert("charge".to_string(), Value::from(charge));
        document.insert("multiplicity".to_string(), Value::from(multiplicity));
        document.insert("model".to_string(), encode("model", serde_json::to_value(model))?);
        document.insert("label".to_string(), Value::from(label));
        document.insert("graphs".to_string(), Value::Object(Map::new()));
        document.insert("properties".to_string(), Value::Object(Map::new()));
        document.insert("calculations".to_string(), Value::Object(Map::new()));
        create(self, document)
    }

    /// Creates a structure in `collection` and returns its handle.
    pub fn make(
        atoms: &AtomCollection,
        charge: i32,
        multiplicity: i32,
        model: &ModelDescriptor,
        label: StructureLabel,
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut structure = Self::in_collection(collection);
        structure.create_with(atoms, charge, multiplicity, model, label)?;
        Ok(structure)
    }

    /// Owning compound or flask.
    ///
    /// With `recursive`, an unset aggregate is looked up through the
    /// `duplicate_of` chain.
    ///
    /// # Errors
    /// - `FieldNotSet` when no aggregate is found.
    /// - `DuplicateCycle` when the chain loops or exceeds the hop limit.
    pub fn get_aggregate(&self, recursive: bool) -> EntityResult<Identifier> {
        let (id, _) = access(self)?;
        self.resolve_aggregate(recursive)?
            .ok_or_else(|| EntityError::FieldNotSet {
                kind: Self::KIND,
                field: AGGREGATE.to_string(),
                id,
            })
    }

    pub fn has_aggregate(&self, recursive: bool) -> EntityResult<bool> {
        Ok(self.resolve_aggregate(recursive)?.is_some())
    }

    pub fn set_aggregate(&self, aggregate: Identifier) -> EntityResult<()> {
        Field::<Identifier>::new(AGGREGATE).set(self, &aggregate)
    }

    pub fn clear_aggregate(&self) -> EntityResult<()> {
        Field::<Identifier>::new(AGGREGATE).clear(self)
    }

    fn resolve_aggregate(&self, recursive: bool) -> EntityResult<Option<Identifier>> {
        let (start, collection) = access(self)?;
        let mut current = self.clone();
        let mut visited = HashSet::from([start]);
        loop {
            let (id, document) = read(&current, &[AGGREGATE, DUPLICATE_OF])?;
            if let Some(aggregate) = reference(&document, AGGREGATE, id)? {
                return Ok(Some(aggregate));
            }
            if !recursive {
                return Ok(None);
            }
            let Some(original) = reference(&document, DUPLICATE_OF, id)? else {
                return Ok(None);
            };
            if !visited.insert(original) || visited.len() > MAX_DUPLICATE_HOPS {
                return Err(EntityError::DuplicateCycle {
                    id: start,
                    hops: visited.len(),
                });
            }
            current = Self::linked(original, collection.clone());
        }
    }

    pub fn has_original(&self) -> EntityResult<bool> {
        Field::<Identifier>::new(DUPLICATE_OF).has(self)
    }

    /// Structure this one duplicates.
    pub fn get_original(&self) -> EntityResult<Identifier> {
        Field::<Identifier>::new(DUPLICATE_OF).get(self)
    }

    /// # Errors
    /// - `SelfDuplicate` when `original` is this structure's own id.
    pub fn set_original(&self, original: Identifier) -> EntityResult<()> {
        let (id, _) = access(self)?;
        if id == original {
            return Err(EntityError::SelfDuplicate { id });
        }
        Field::<Identifier>::new(DUPLICATE_OF).set(self, &original)
    }

    pub fn clear_original(&self) -> EntityResult<()> {
        Field::<Identifier>::new(DUPLICATE_OF).clear(self)
    }

    /// Number of property ids under `label`.
    pub fn has_properties(&self, label: &str) -> EntityResult<usize> {
        PROPERTIES.count(self, label)
    }

    pub fn has_property(&self, label: &str) -> EntityResult<bool> {
        Ok(PROPERTIES.labels(self)?.iter().any(|stored| stored == label))
    }

    /// Whether `property` is indexed under any label.
    pub fn has_property_id(&self, property: Identifier) -> EntityResult<bool> {
        PROPERTIES.contains_anywhere(self, &property)
    }

    /// The single property id under `label`.
    ///
    /// # Errors
    /// - `FieldMismatch` unless exactly one id is stored.
    pub fn get_property(&self, label: &str) -> EntityResult<Identifier> {
        single(self, "properties", label, PROPERTIES.get(self, label)?)
    }

    pub fn get_properties(&self, label: &str) -> EntityResult<Vec<Identifier>> {
        PROPERTIES.get(self, label)
    }

    /// Replaces the ids under `label` with `property` alone.
    pub fn set_property(&self, label: &str, property: Identifier) -> EntityResult<()> {
        PROPERTIES.set(self, label, &[property])
    }

    pub fn set_properties(&self, label: &str, properties: &[Identifier]) -> EntityResult<()> {
        PROPERTIES.set(self, label, properties)
    }

    pub fn add_property(&self, label: &str, property: Identifier) -> EntityResult<()> {
        PROPERTIES.add(self, label, &property)
    }

    pub fn remove_property(&self, label: &str, property: Identifier) -> EntityResult<()> {
        PROPERTIES.remove(self, label, &property)
    }

    pub fn clear_properties(&self, label: &str) -> EntityResult<()> {
        PROPERTIES.clear(self, label)
    }

    pub fn get_all_properties(&self) -> EntityResult<BTreeMap<String, Vec<Identifier>>> {
        PROPERTIES.get_all(self)
    }

    pub fn set_all_properties(
        &self,
        properties: &BTreeMap<String, Vec<Identifier>>,
    ) -> EntityResult<()> {
        PROPERTIES.set_all(self, properties)
    }

    pub fn clear_all_properties(&self) -> EntityResult<()> {
        PROPERTIES.clear_all(self)
    }

    /// Property ids under `label` whose model matches `model`, in label order.
    pub fn query_properties(
        &self,
        label: &str,
        model: &ModelDescriptor,
        properties: &CollectionHandle,
    ) -> EntityResult<Vec<Identifier>> {
        let ids = PROPERTIES.get(self, label)?;
        matching_models(EntityKind::Property, ids, model, properties)
    }

    pub fn has_calculations(&self, label: &str) -> EntityResult<usize> {
        CALCULATIONS.count(self, label)
    }

    pub fn has_calculation(&self, label: &str) -> EntityResult<bool> {
        Ok(CALCULATIONS.labels(self)?.iter().any(|stored| stored == label))
    }

    pub fn has_calculation_id(&self, calculation: Identifier) -> EntityResult<bool> {
        CALCULATIONS.contains_anywhere(self, &calculation)
    }

    /// # Errors
    /// - `FieldMismatch` unless exactly one id is stored under `label`.
    pub fn get_calculation(&self, label: &str) -> EntityResult<Identifier> {
        single(self, "calculations", label, CALCULATIONS.get(self, label)?)
    }

    pub fn get_calculations(&self, label: &str) -> EntityResult<Vec<Identifier>> {
        CALCULATIONS.get(self, label)
    }

    pub fn set_calculation(&self, label: &str, calculation: Identifier) -> EntityResult<()> {
        CALCULATIONS.set(self, label, &[calculation])
    }

    pub fn set_calculations(&self, label: &str, calculations: &[Identifier]) -> EntityResult<()> {
        CALCULATIONS.set(self, label, calculations)
    }

    pub fn add_calculation(&self, label: &str, calculation: Identifier) -> EntityResult<()> {
        CALCULATIONS.add(self, label, &calculation)
    }

    pub fn remove_calculation(&self, label: &str, calculation: Identifier) -> EntityResult<()> {
        CALCULATIONS.remove(self, label, &calculation)
    }

    pub fn clear_calculations(&self, label: &str) -> EntityResult<()> {
        CALCULATIONS.clear(self, label)
    }

    pub fn get_all_calculations(&self) -> EntityResult<BTreeMap<String, Vec<Identifier>>> {
        CALCULATIONS.get_all(self)
    }

    pub fn set_all_calculations(
        &self,
        calculations: &BTreeMap<String, Vec<Identifier>>,
    ) -> EntityResult<()> {
        CALCULATIONS.set_all(self, calculations)
    }

    pub fn clear_all_calculations(&self) -> EntityResult<()> {
        CALCULATIONS.clear_all(self)
    }

    /// Calculation ids under `label` whose model matches `model`.
    pub fn query_calculations(
        &self,
        label: &str,
        model: &ModelDescriptor,
        calculations: &CollectionHandle,
    ) -> EntityResult<Vec<Identifier>> {
        let ids = CALCULATIONS.get(self, label)?;
        matching_models(EntityKind::Calculation, ids, model, calculations)
    }
}

/// Identifier stored at `field`, or `None` when absent, `null` or empty.
fn reference(
    document: &serde_json::Map<String, Value>,
    field: &str,
    id: Identifier,
) -> EntityResult<Option<Identifier>> {
    match get_dotted(document, field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.is_empty() => Ok(None),
        Some(Value::String(raw)) => Identifier::parse_str(raw)
            .map(Some)
            .map_err(|err| EntityError::invalid_data(EntityKind::Structure, field, Some(id), err)),
        Some(_) => Err(EntityError::invalid_data(
            EntityKind::Structure,
            field,
            Some(id),
            "not an identifier",
        )),
    }
}

fn single(
    structure: &Structure,
    field: &str,
    label: &str,
    ids: Vec<Identifier>,
) -> EntityResult<Identifier> {
    let (id, _) = access(structure)?;
    match ids.as_slice() {
        [only] => Ok(*only),
        other => Err(EntityError::FieldMismatch {
            kind: EntityKind::Structure,
            field: format!("{field}.{label}"),
            id,
            message: format!("expected exactly one id, found {}", other.len()),
        }),
    }
}

/// Subset of `ids` whose stored `model` matches `model`, keeping order.
///
/// The store preselects on the pushed-down string fields; every candidate
/// is re-checked with [`ModelDescriptor::matches`].
pub(crate) fn matching_models(
    kind: EntityKind,
    ids: Vec<Identifier>,
    model: &ModelDescriptor,
    collection: &CollectionHandle,
) -> EntityResult<Vec<Identifier>> {
    if ids.is_empty() {
        return Ok(ids);
    }
    let filter = Filter::and([Filter::by_ids(ids.iter().copied()), model.to_filter("model")]);
    let mut matched = HashSet::new();
    for document in collection.read_matching(&filter, &["model"])? {
        let Some(Value::String(raw)) = document.get(crate::store::ID_FIELD) else {
            continue;
        };
        let id = Identifier::parse_str(raw)
            .map_err(|err| EntityError::invalid_data(kind, crate::store::ID_FIELD, None, err))?;
        let Some(stored) = document.get("model") else {
            continue;
        };
        let stored: ModelDescriptor = serde_json::from_value(stored.clone())
            .map_err(|err| EntityError::invalid_data(kind, "model", Some(id), err))?;
        if stored.matches(model) {
            matched.insert(id);
        }
    }
    Ok(ids.into_iter().filter(|id| matched.contains(id)).collect())
}
