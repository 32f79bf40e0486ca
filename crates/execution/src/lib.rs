//! Rule execution - dependency tracking, scheduling, and the engine facade.

#![warn(missing_docs)]

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod tracker;

pub use engine::{ValidationError, ValidationOptions, ValidationRunResult, Validator};
pub use executor::SingleRuleExecutor;
pub use scheduler::{ExecutionError, RuleScheduler};
pub use tracker::{DependencyTracking, RuleDependencyTracker};
