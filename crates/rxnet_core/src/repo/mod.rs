//! Collection handles and the store manager.
//!
//! # Responsibility
//! - Expose the query and atomic-update primitives entities build on.
//! - Own the store connection and the default collection layout.
//!
//! # Invariants
//! - Entities only ever reach the store through a `Collection`.

pub mod collection;
pub mod manager;

pub use collection::{Collection, CollectionHandle, EntityCursor};
pub use manager::Manager;
