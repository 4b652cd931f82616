//! Audit orchestration service.
//!
//! The [`orchestrator::AuditOrchestrator`] ties the core worker supervisor,
//! reconciler and job store together, providing a single entry point for
//! launching audits and querying their jobs.

pub mod orchestrator;
