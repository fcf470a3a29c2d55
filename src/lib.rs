//! Job state reconciliation for a workload management system.
//!
//! Merges out-of-order status reports into the canonical state of each job,
//! reschedules failed jobs and keeps the task queues consistent with both.

pub mod audit_log;
pub mod background;
pub mod config;
pub mod error;
pub mod jdl;
pub mod job_store;
pub mod metrics;
pub mod policy;
pub mod removal;
pub mod reschedule;
pub mod sandbox_store;
pub mod service;
pub mod sqlite_persistence;
pub mod status;
pub mod task_queue;

// Re-export commonly used types for convenience
pub use error::{JobFailure, WmsError};
pub use policy::PolicyConfig;
pub use service::{Dispatched, JobStateService, JobStateStores};
