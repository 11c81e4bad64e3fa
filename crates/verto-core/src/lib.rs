//! Core building blocks shared by the verto crates: the named-topic event bus,
//! identifier generation and tracing setup.

pub mod events;
pub mod ids;
pub mod tracing;

pub use events::{EventBus, HandlerId, Topic};
pub use ids::generate_guid;
pub use tracing::{init_tracing, validate_filter, TracingConfig, TracingError, TracingOutputFormat};
