//! Out-of-process audit workers.
//!
//! All subprocess management is pure (no registry access) and lives in the
//! `core` crate for isolation and testability. Consumers receive a stream of
//! [`worker::WorkerSignal`]s and decide what to do with them.

pub mod supervisor;
pub mod worker;
