//! Error classification and recovery.
//!
//! Failures are described by an [`ErrorContext`] and handed to the
//! [`RecoveryEngine`], which either applies the strategy registered for the
//! error kind or refuses. Refusals happen for critical failures, exhausted
//! retries, kinds without a strategy, and kinds whose [`CircuitBreaker`] is
//! open.

mod circuit;
mod context;
mod engine;
mod strategies;

pub use circuit::CircuitBreaker;
pub use context::{ErrorContext, ErrorType, Failure, Severity};
pub use engine::RecoveryEngine;
