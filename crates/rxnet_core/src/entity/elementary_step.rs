//! Elementary step: structure-level transformation realizing a reaction.
//!
//! # Responsibility
//! - Keep ordered `lhs`/`rhs` structure id lists and the reaction path.
//! - Store the `lhs_rhs` and `lhs_ts` atom index maps and derive the
//!   reverse and chained maps from them.
//!
//! # Invariants
//! - Only `lhs_rhs` and `lhs_ts` are persisted; every other map is computed
//!   on read and never written.
//! - A derived map is only produced from permutations of matching size.

use crate::entity::field::{list_fields, scalar_fields};
use crate::entity::object::{access, base_document, create, entity_kind, read, write};
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::{ElementaryStepType, EntityKind, IdxMapType, Side};
use crate::model::payload::TrajectorySpline;
use crate::repo::CollectionHandle;
use crate::store::document::get_dotted;
use crate::store::{Document, Update};
use serde_json::{Map, Value};

const LHS: &str = "lhs";
const RHS: &str = "rhs";
const IDX_MAPS: &str = "idx_maps";
const LHS_RHS: &str = "idx_maps.lhs_rhs";
const LHS_TS: &str = "idx_maps.lhs_ts";

entity_kind! {
    /// Handle to a document in the elementary steps collection.
    ElementaryStep => EntityKind::ElementaryStep
}

scalar_fields!(ElementaryStep {
    "type": ElementaryStepType => has_type, get_type, set_type, clear_type;
    "transition_state": Identifier => has_transition_state, get_transition_state,
        set_transition_state, clear_transition_state;
    "reaction": Identifier => has_reaction, get_reaction, set_reaction, clear_reaction;
    "spline": TrajectorySpline => has_spline, get_spline, set_spline, clear_spline;
    "comment": String => has_comment, get_comment, set_comment, clear_comment;
});

list_fields!(ElementaryStep {
    "path": Identifier => has_path, get_path, set_path, add_to_path, remove_from_path,
        has_structure_in_path, clear_path;
});

fn sides(side: Side) -> impl Iterator<Item = &'static str> {
    [(side.includes_lhs(), LHS), (side.includes_rhs(), RHS)]
        .into_iter()
        .filter_map(|(included, field)| included.then_some(field))
}

fn id_array(ids: &[Identifier]) -> Value {
    Value::Array(ids.iter().copied().map(Value::from).collect())
}

fn decode_ids(document: &Document, field: &str, id: Identifier) -> EntityResult<Vec<Identifier>> {
    match get_dotted(document, field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
            EntityError::invalid_data(EntityKind::ElementaryStep, field, Some(id), err)
        }),
    }
}

fn decode_map(document: &Document, field: &str, id: Identifier) -> EntityResult<Option<Vec<usize>>> {
    match get_dotted(document, field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
            EntityError::invalid_data(EntityKind::ElementaryStep, field, Some(id), err)
        }),
    }
}

/// Inverse permutation; `None` unless `map` is a permutation of `0..len`.
fn reverse(map: &[usize]) -> Option<Vec<usize>> {
    let mut inverse = vec![usize::MAX; map.len()];
    for (from, &to) in map.iter().enumerate() {
        let slot = inverse.get_mut(to)?;
        if *slot != usize::MAX {
            return None;
        }
        *slot = from;
    }
    Some(inverse)
}

/// `second ∘ first`; `None` on a size mismatch or out-of-range index.
fn chain(first: &[usize], second: &[usize]) -> Option<Vec<usize>> {
    if first.len() != second.len() {
        return None;
    }
    first.iter().map(|&index| second.get(index).copied()).collect()
}

fn persisted_path(map: IdxMapType) -> Option<&'static str> {
    match map {
        IdxMapType::LhsRhs => Some(LHS_RHS),
        IdxMapType::LhsTs => Some(LHS_TS),
        _ => None,
    }
}

impl ElementaryStep {
    /// Creates a `regular` step with an empty path and no index maps.
    pub fn create(&mut self, lhs: &[Identifier], rhs: &[Identifier]) -> EntityResult<Identifier> {
        let mut document = base_document(EntityKind::ElementaryStep);
        document.insert(LHS.to_string(), id_array(lhs));
        document.insert(RHS.to_string(), id_array(rhs));
        document.insert("type".to_string(), Value::from(ElementaryStepType::Regular));
        document.insert("path".to_string(), Value::Array(Vec::new()));
        document.insert(IDX_MAPS.to_string(), Value::Object(Map::new()));
        create(self, document)
    }

    pub fn make(
        lhs: &[Identifier],
        rhs: &[Identifier],
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut step = Self::in_collection(collection);
        step.create(lhs, rhs)?;
        Ok(step)
    }

    fn entries(&self) -> EntityResult<(Vec<Identifier>, Vec<Identifier>)> {
        let (id, document) = read(self, &[LHS, RHS])?;
        Ok((decode_ids(&document, LHS, id)?, decode_ids(&document, RHS, id)?))
    }

    /// Structure ids per side; an excluded side is empty.
    pub fn get_reactants(&self, side: Side) -> EntityResult<(Vec<Identifier>, Vec<Identifier>)> {
        let (lhs, rhs) = self.entries()?;
        Ok((
            if side.includes_lhs() { lhs } else { Vec::new() },
            if side.includes_rhs() { rhs } else { Vec::new() },
        ))
    }

    /// `(lhs_count, rhs_count)`.
    pub fn has_reactants(&self) -> EntityResult<(usize, usize)> {
        let (lhs, rhs) = self.entries()?;
        Ok((lhs.len(), rhs.len()))
    }

    pub fn has_reactant(&self, reactant: Identifier) -> EntityResult<Side> {
        let (lhs, rhs) = self.entries()?;
        Ok(Side::from_membership(lhs.contains(&reactant), rhs.contains(&reactant)))
    }

    pub fn add_reactant(&self, reactant: Identifier, side: Side) -> EntityResult<()> {
        let update = sides(side).fold(Update::new(), |update, field| update.push(field, reactant));
        self.apply(update)
    }

    pub fn remove_reactant(&self, reactant: Identifier, side: Side) -> EntityResult<()> {
        let update = sides(side).fold(Update::new(), |update, field| update.pull(field, reactant));
        self.apply(update)
    }

    /// Replaces the selected sides with `reactants`.
    pub fn set_reactants(&self, reactants: &[Identifier], side: Side) -> EntityResult<()> {
        let update = sides(side).fold(Update::new(), |update, field| {
            update.set(field, id_array(reactants))
        });
        self.apply(update)
    }

    pub fn clear_reactants(&self, side: Side) -> EntityResult<()> {
        self.set_reactants(&[], side)
    }

    fn apply(&self, update: Update) -> EntityResult<()> {
        access(self)?;
        if update.is_empty() {
            return Ok(());
        }
        write(self, &update)
    }

    fn stored_maps(&self) -> EntityResult<(Identifier, Option<Vec<usize>>, Option<Vec<usize>>)> {
        let (id, document) = read(self, &[IDX_MAPS])?;
        Ok((
            id,
            decode_map(&document, LHS_RHS, id)?,
            decode_map(&document, LHS_TS, id)?,
        ))
    }

    /// Whether `map` is stored or derivable from what is stored.
    pub fn has_idx_map(&self, map: IdxMapType) -> EntityResult<bool> {
        let (_, lhs_rhs, lhs_ts) = self.stored_maps()?;
        Ok(match map {
            IdxMapType::LhsRhs | IdxMapType::RhsLhs => lhs_rhs.is_some(),
            IdxMapType::LhsTs | IdxMapType::TsLhs => lhs_ts.is_some(),
            IdxMapType::TsRhs | IdxMapType::RhsTs => lhs_rhs.is_some() && lhs_ts.is_some(),
        })
    }

    /// Stored or derived atom index map.
    ///
    /// # Errors
    /// - `FieldNotSet` when a required stored map is missing.
    /// - `FieldMismatch` when stored maps are not permutations or differ
    ///   in size.
    pub fn get_idx_map(&self, map: IdxMapType) -> EntityResult<Vec<usize>> {
        let (id, lhs_rhs, lhs_ts) = self.stored_maps()?;
        let required = |stored: Option<Vec<usize>>, field: &str| {
            stored.ok_or_else(|| EntityError::FieldNotSet {
                kind: EntityKind::ElementaryStep,
                field: field.to_string(),
                id,
            })
        };
        let mismatch = |field: &str, message: &str| EntityError::FieldMismatch {
            kind: EntityKind::ElementaryStep,
            field: field.to_string(),
            id,
            message: message.to_string(),
        };
        let inverse = |stored: &[usize], field: &str| {
            reverse(stored).ok_or_else(|| mismatch(field, "not a permutation"))
        };
        match map {
            IdxMapType::LhsRhs => required(lhs_rhs, LHS_RHS),
            IdxMapType::LhsTs => required(lhs_ts, LHS_TS),
            IdxMapType::RhsLhs => inverse(&required(lhs_rhs, LHS_RHS)?, LHS_RHS),
            IdxMapType::TsLhs => inverse(&required(lhs_ts, LHS_TS)?, LHS_TS),
            IdxMapType::TsRhs | IdxMapType::RhsTs => {
                let lhs_rhs = required(lhs_rhs, LHS_RHS)?;
                let ts_lhs = inverse(&required(lhs_ts, LHS_TS)?, LHS_TS)?;
                let ts_rhs = chain(&ts_lhs, &lhs_rhs)
                    .ok_or_else(|| mismatch(IDX_MAPS, "index maps differ in size"))?;
                if map == IdxMapType::TsRhs {
                    Ok(ts_rhs)
                } else {
                    inverse(&ts_rhs, LHS_RHS)
                }
            }
        }
    }

    /// Stores `lhs_rhs` or `lhs_ts`.
    ///
    /// # Errors
    /// - `Validation` for a derived map type or a non-permutation.
    pub fn set_idx_map(&self, map: IdxMapType, indices: &[usize]) -> EntityResult<()> {
        access(self)?;
        let path = persisted_path(map).ok_or_else(|| {
            EntityError::validation(
                EntityKind::ElementaryStep,
                IDX_MAPS,
                format!("{map:?} is derived and cannot be stored"),
            )
        })?;
        if reverse(indices).is_none() {
            return Err(EntityError::validation(
                EntityKind::ElementaryStep,
                path,
                "index map is not a permutation",
            ));
        }
        write(self, &Update::new().set(path, indices.to_vec()))
    }

    /// Removes a stored map; derived types remove nothing.
    pub fn remove_idx_map(&self, map: IdxMapType) -> EntityResult<()> {
        access(self)?;
        match persisted_path(map) {
            Some(path) => write(self, &Update::new().unset(path)),
            None => Ok(()),
        }
    }

    pub fn clear_idx_maps(&self) -> EntityResult<()> {
        write(self, &Update::new().set(IDX_MAPS, Value::Object(Map::new())))
    }
}
