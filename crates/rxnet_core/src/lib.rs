//! Typed document mapping for a chemical reaction network.
//! Entities are thin handles; every accessor is one store round trip.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{StoreConfig, StoreLocation};
pub use entity::{
    BoolProperty, Calculation, Compound, DenseMatrixProperty, ElementaryStep, Entity, Flask, Job,
    NumberProperty, Property, PropertyKind, Reactant, Reaction, Results, SparseMatrixProperty,
    StringProperty, Structure, VectorProperty,
};
pub use error::{AccessCause, EntityError, EntityResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::descriptor::{ModelConflict, ModelDescriptor, ModelNumber, Settings};
pub use model::id::Identifier;
pub use model::payload::{Atom, AtomCollection, DenseMatrix, SparseMatrix, TrajectorySpline};
pub use model::layout::{
    CalculationStatus, ElementaryStepType, EntityKind, IdxMapType, ReactantType, Side,
    StructureLabel, Version, LAYOUT_VERSION,
};
pub use repo::{Collection, CollectionHandle, EntityCursor, Manager};
pub use service::CalculationQueue;
pub use store::{
    Document, Filter, Projection, ReturnDocument, Sort, SortOrder, SqliteStore, Store,
    StoreError, StoreResult, Update,
};

/// Minimal health-check API for integration probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
