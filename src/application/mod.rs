//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Admission gate (race-free accept/reject over the shared store)
//! - Campaign lifecycle (persisted OPEN → CLOSED transition)
//! - Admission service (apply, reconcile)
//! - Baseline applier (transactional comparison path)
//! - Application recorder (durable sink for published events)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod baseline;
pub mod circuit_breaker;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod ports;
pub mod recorder;
pub mod retry;
pub mod service;
