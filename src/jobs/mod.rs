//! Concrete [`crate::scheduler::JobHandler`] implementations.

pub mod batch_result_processor;
pub mod batch_submitter;
