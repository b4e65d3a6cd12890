//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of application logic.

pub mod clock;
pub mod layer;
pub mod publisher;
pub mod store;

pub use clock::MockClock;
pub use layer::{CapturedLog, LogCapture};
pub use publisher::RecordingPublisher;
pub use store::FlakyAdmissionStore;
