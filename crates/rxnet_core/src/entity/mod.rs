//! Entity kinds of the reaction network.
//!
//! # Responsibility
//! - Provide one typed handle per persisted kind.
//! - Keep every field accessor on the shared `Field` contract.
//!
//! # Invariants
//! - Handles carry only `(id, collection)`; all field state is server-side.

pub mod calculation;
pub mod compound;
pub mod elementary_step;
pub mod field;
pub mod flask;
pub mod object;
pub mod property;
pub mod reaction;
pub mod structure;

/// Discriminates property payload kinds inside the properties collection.
pub const PROPERTY_TYPE_FIELD: &str = "_propertytype";

pub use calculation::{Calculation, Job, Results};
pub use compound::Compound;
pub use elementary_step::ElementaryStep;
pub use flask::Flask;
pub use object::{Entity, Object};
pub use property::{
    BoolProperty, DenseMatrixProperty, NumberProperty, Property, PropertyKind,
    SparseMatrixProperty, StringProperty, TypedProperty, VectorProperty,
};
pub use reaction::{Reactant, Reaction};
pub use structure::Structure;
