//! Status merge: turns bulk, possibly out-of-order reports into the
//! canonical state of each job.

mod exec_times;
mod merge;
mod report;
mod state_machine;

pub use exec_times::{ExecTimeInference, StatusTransitionTimes};
pub use merge::{SetJobStatusResult, StatusMergeEngine};
pub use report::{
    parse_report_timestamp, RawStatusChanges, ReportBatch, StatusReport, StatusUpdate,
    DEFAULT_SOURCE,
};
pub use state_machine::{JobsStateMachine, StatusResolution, StatusResolver};
