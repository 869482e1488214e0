//! Value types shared by the store, collection and entity layers.
//!
//! # Responsibility
//! - Define identifiers, model descriptors and payload blobs.
//! - Pin the persisted spellings of enums and collection names.
//!
//! # Invariants
//! - Nothing in this module performs I/O.
//! - Every type here is embedded in documents, never persisted on its own.

pub mod descriptor;
pub mod id;
pub mod layout;
pub mod payload;
