//! Sequential plan execution (spec.md §4.8).

mod executor;

pub use executor::{ExecutionOutcome, Executor};
