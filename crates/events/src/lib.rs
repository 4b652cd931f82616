//! Job lifecycle event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: one observable step in a job's life (launched,
//!   progressed, completed, failed).

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind};
