//! Tensordag Core - shared types for the tensordag execution engine.
//!
//! This crate provides the tensor and DAG data model used by all tensordag
//! components, plus the ambient utilities (error types, tracing macros).

pub mod error;
pub mod logging;
pub mod types;

pub use error::{OpError, SchedulerError, TensorError};
pub use types::{Dag, DagOp, OpIndex, OpKind, Tensor, normalize_device};

/// Convenience alias for results carrying a [`SchedulerError`].
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
