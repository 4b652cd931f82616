//! Cloud audit API server library.
//!
//! Exposes the core building blocks (config, state, error handling, routes,
//! the audit orchestrator) so integration tests and the binary entrypoint
//! can both access them.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod scripting;
pub mod state;
