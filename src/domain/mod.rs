//! Domain layer - pure types with no I/O.
//!
//! This layer contains the core concepts and invariants of admission control:
//! - Campaigns and their one-way OPEN/CLOSED lifecycle
//! - Application records and the events that carry them
//! - Gate decisions and the final outcome of an apply call
//!
//! All types in this layer are pure and easily testable.

pub mod application;
pub mod campaign;
pub mod decision;
