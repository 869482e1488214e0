//! Reaction: aggregate-level transformation between compounds and flasks.
//!
//! # Responsibility
//! - Keep ordered `lhs`/`rhs` reactant lists of `{id, type}` entries.
//! - List the elementary steps realizing the reaction.
//!
//! # Invariants
//! - Every reactant mutation is one atomic update covering every side the
//!   selector names; `Side::Both` edits both lists identically.

use crate::entity::field::list_fields;
use crate::entity::object::{access, base_document, create, entity_kind, read, write};
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::{EntityKind, ReactantType, Side};
use crate::repo::CollectionHandle;
use crate::store::{Document, Update};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const LHS: &str = "lhs";
const RHS: &str = "rhs";

/// One entry of a reactant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reactant {
    pub id: Identifier,
    #[serde(rename = "type")]
    pub kind: ReactantType,
}

impl Reactant {
    pub fn new(id: Identifier, kind: ReactantType) -> Self {
        Self { id, kind }
    }

    pub fn compound(id: Identifier) -> Self {
        Self::new(id, ReactantType::Compound)
    }

    pub fn flask(id: Identifier) -> Self {
        Self::new(id, ReactantType::Flask)
    }
}

impl From<Reactant> for Value {
    fn from(value: Reactant) -> Self {
        json!({ "id": value.id.to_string(), "type": value.kind.as_str() })
    }
}

entity_kind! {
    /// Handle to a document in the reactions collection.
    Reaction => EntityKind::Reaction
}

list_fields!(Reaction {
    "elementary_steps": Identifier => has_elementary_steps, get_elementary_steps,
        set_elementary_steps, add_elementary_step, remove_elementary_step,
        has_elementary_step, clear_elementary_steps;
});

fn sides(side: Side) -> impl Iterator<Item = &'static str> {
    [(side.includes_lhs(), LHS), (side.includes_rhs(), RHS)]
        .into_iter()
        .filter_map(|(included, field)| included.then_some(field))
}

fn decode_side(document: &Document, field: &str, id: Identifier) -> EntityResult<Vec<Reactant>> {
    match document.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
            EntityError::invalid_data(EntityKind::Reaction, field, Some(id), err)
        }),
    }
}

impl Reaction {
    /// Creates the document with compound-typed reactants.
    pub fn create(&mut self, lhs: &[Identifier], rhs: &[Identifier]) -> EntityResult<Identifier> {
        let lhs: Vec<_> = lhs.iter().copied().map(Reactant::compound).collect();
        let rhs: Vec<_> = rhs.iter().copied().map(Reactant::compound).collect();
        self.create_typed(&lhs, &rhs)
    }

    pub fn create_typed(&mut self, lhs: &[Reactant], rhs: &[Reactant]) -> EntityResult<Identifier> {
        let mut document = base_document(EntityKind::Reaction);
        document.insert(LHS.to_string(), Value::Array(lhs.iter().copied().map(Value::from).collect()));
        document.insert(RHS.to_string(), Value::Array(rhs.iter().copied().map(Value::from).collect()));
        document.insert("elementary_steps".to_string(), Value::Array(Vec::new()));
        create(self, document)
    }

    pub fn make(
        lhs: &[Identifier],
        rhs: &[Identifier],
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut reaction = Self::in_collection(collection);
        reaction.create(lhs, rhs)?;
        Ok(reaction)
    }

    fn entries(&self) -> EntityResult<(Vec<Reactant>, Vec<Reactant>)> {
        let (id, document) = read(self, &[LHS, RHS])?;
        Ok((decode_side(&document, LHS, id)?, decode_side(&document, RHS, id)?))
    }

    /// Both reactant lists with their types; an excluded side is empty.
    pub fn get_reactant_entries(&self, side: Side) -> EntityResult<(Vec<Reactant>, Vec<Reactant>)> {
        let (lhs, rhs) = self.entries()?;
        Ok((
            if side.includes_lhs() { lhs } else { Vec::new() },
            if side.includes_rhs() { rhs } else { Vec::new() },
        ))
    }

    pub fn get_reactants(&self, side: Side) -> EntityResult<(Vec<Identifier>, Vec<Identifier>)> {
        let (lhs, rhs) = self.get_reactant_entries(side)?;
        Ok((
            lhs.into_iter().map(|r| r.id).collect(),
            rhs.into_iter().map(|r| r.id).collect(),
        ))
    }

    pub fn get_reactant_types(
        &self,
        side: Side,
    ) -> EntityResult<(Vec<ReactantType>, Vec<ReactantType>)> {
        let (lhs, rhs) = self.get_reactant_entries(side)?;
        Ok((
            lhs.into_iter().map(|r| r.kind).collect(),
            rhs.into_iter().map(|r| r.kind).collect(),
        ))
    }

    /// Type of `reactant`, taken from its first occurrence (lhs first).
    ///
    /// # Errors
    /// - `Validation` when `reactant` is on neither side.
    pub fn get_reactant_type(&self, reactant: Identifier) -> EntityResult<ReactantType> {
        let (lhs, rhs) = self.entries()?;
        lhs.iter()
            .chain(rhs.iter())
            .find(|entry| entry.id == reactant)
            .map(|entry| entry.kind)
            .ok_or_else(|| {
                EntityError::validation(
                    EntityKind::Reaction,
                    "reactants",
                    format!("{reactant} is not a reactant"),
                )
            })
    }

    /// `(lhs_count, rhs_count)`.
    pub fn has_reactants(&self) -> EntityResult<(usize, usize)> {
        let (lhs, rhs) = self.entries()?;
        Ok((lhs.len(), rhs.len()))
    }

    /// Sides `reactant` appears on.
    pub fn has_reactant(&self, reactant: Identifier) -> EntityResult<Side> {
        let (lhs, rhs) = self.entries()?;
        Ok(Side::from_membership(
            lhs.iter().any(|entry| entry.id == reactant),
            rhs.iter().any(|entry| entry.id == reactant),
        ))
    }

    pub fn add_reactant(&self, reactant: Identifier, side: Side, kind: ReactantType) -> EntityResult<()> {
        let entry = Reactant::new(reactant, kind);
        let update = sides(side).fold(Update::new(), |update, field| update.push(field, entry));
        self.apply(update)
    }

    /// Removes every occurrence of `reactant` from the selected sides.
    pub fn remove_reactant(&self, reactant: Identifier, side: Side) -> EntityResult<()> {
        let pattern = json!({ "id": reactant.to_string() });
        let update = sides(side).fold(Update::new(), |update, field| {
            update.pull(field, pattern.clone())
        });
        self.apply(update)
    }

    /// Replaces the selected sides.
    ///
    /// An empty `types` marks every reactant as a compound.
    ///
    /// # Errors
    /// - `Validation` when `types` is non-empty and its length differs.
    pub fn set_reactants(
        &self,
        reactants: &[Identifier],
        side: Side,
        types: &[ReactantType],
    ) -> EntityResult<()> {
        access(self)?;
        if !types.is_empty() && types.len() != reactants.len() {
            return Err(EntityError::validation(
                EntityKind::Reaction,
                "reactants",
                format!("{} types for {} reactants", types.len(), reactants.len()),
            ));
        }
        let entries: Vec<Value> = reactants
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let kind = types.get(index).copied().unwrap_or(ReactantType::Compound);
                Value::from(Reactant::new(*id, kind))
            })
            .collect();
        let update = sides(side).fold(Update::new(), |update, field| {
            update.set(field, Value::Array(entries.clone()))
        });
        self.apply(update)
    }

    pub fn clear_reactants(&self, side: Side) -> EntityResult<()> {
        self.set_reactants(&[], side, &[])
    }

    /// Writes `update` unless the side selector picked nothing.
    fn apply(&self, update: Update) -> EntityResult<()> {
        access(self)?;
        if update.is_empty() {
            return Ok(());
        }
        write(self, &update)
    }
}

#[cfg(test)]
mod tests {
    use super::{Reactant, Reaction};
    use crate::error::EntityError;
    use crate::model::id::Identifier;
    use crate::model::layout::{ReactantType, Side};
    use crate::repo::{Collection, CollectionHandle};
    use crate::store::{SqliteStore, Store};
    use std::sync::Arc;

    fn reactions() -> CollectionHandle {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection("reactions").unwrap();
        Collection::new("reactions", Arc::new(store), 10)
    }

    #[test]
    fn reactants_persist_with_their_type() {
        let (a, b, f) = (Identifier::generate(), Identifier::generate(), Identifier::generate());
        let mut reaction = Reaction::in_collection(reactions());
        reaction
            .create_typed(&[Reactant::compound(a), Reactant::compound(b)], &[Reactant::flask(f)])
            .unwrap();
        assert_eq!(reaction.get_reactant_type(f).unwrap(), ReactantType::Flask);
        assert_eq!(
            reaction.get_reactant_types(Side::Lhs).unwrap(),
            (vec![ReactantType::Compound, ReactantType::Compound], vec![])
        );
        assert_eq!(reaction.has_reactant(b).unwrap(), Side::Lhs);
        assert!(matches!(
            reaction.get_reactant_type(Identifier::generate()).unwrap_err(),
            EntityError::Validation { .. }
        ));
    }

    #[test]
    fn set_reactants_checks_type_count() {
        let reaction = Reaction::make(&[], &[], reactions()).unwrap();
        let ids = [Identifier::generate(), Identifier::generate()];
        let err = reaction
            .set_reactants(&ids, Side::Rhs, &[ReactantType::Flask])
            .unwrap_err();
        assert!(matches!(err, EntityError::Validation { .. }));
        assert_eq!(reaction.has_reactants().unwrap(), (0, 0));

        reaction.set_reactants(&ids, Side::Rhs, &[]).unwrap();
        assert_eq!(
            reaction.get_reactant_types(Side::Rhs).unwrap().1,
            vec![ReactantType::Compound, ReactantType::Compound]
        );
        reaction.clear_reactants(Side::Both).unwrap();
        assert_eq!(reaction.has_reactants().unwrap(), (0, 0));
    }

    #[test]
    fn remove_matches_by_id_regardless_of_type() {
        let x = Identifier::generate();
        let reaction = Reaction::make(&[], &[], reactions()).unwrap();
        reaction.add_reactant(x, Side::Lhs, ReactantType::Flask).unwrap();
        reaction.add_reactant(x, Side::Rhs, ReactantType::Compound).unwrap();
        reaction.remove_reactant(x, Side::Both).unwrap();
        assert_eq!(reaction.has_reactant(x).unwrap(), Side::None);
    }
}
