//! Worker-facing use-case services.
//!
//! # Responsibility
//! - Compose collection primitives into workflow-level operations.
//! - Keep worker code independent of document layout details.

pub mod calculation_queue;

pub use calculation_queue::CalculationQueue;
