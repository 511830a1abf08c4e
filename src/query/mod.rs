//! Statement execution for stmt-runner.
//!
//! This module holds the execute → scan → truncate → summarize pipeline and
//! the outcome it produces.

pub mod outcome;
pub mod runner;

pub use outcome::{ExecutionOutcome, ExecutionStats};
pub use runner::{StatementRunner, DEFAULT_DEADLINE};
