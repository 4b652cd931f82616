//! Domain logic for the cloud audit job orchestrator.
//!
//! Everything here is free of HTTP concerns: the job model and its
//! forward-only state machine, the job store, the category vocabulary,
//! credential lookup, the progress parser, worker supervision and the
//! completion reconciler.

pub mod category;
pub mod credentials;
pub mod error;
pub mod job;
pub mod job_id;
pub mod launch;
pub mod progress;
pub mod reconciler;
pub mod registry;
pub mod report;
pub mod scripting;
pub mod types;
