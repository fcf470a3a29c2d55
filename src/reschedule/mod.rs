//! Puts failed jobs back into the pipeline with a fresh description.

mod engine;

pub use engine::{derive_site, RescheduleEngine, RescheduleResult, RescheduledJob};
