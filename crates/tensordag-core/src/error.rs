//! Error types for the tensordag runtime.
//!
//! This module defines the errors surfaced by the scheduler layer
//! (registry and worker-pool failures) and by operation execution.

use thiserror::Error;

/// Errors raised by the scheduler layer: device registry, worker pools,
/// and request submission.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler configuration failed validation.
    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    /// A device string was empty or not ASCII.
    #[error("Invalid device string: {device:?}")]
    InvalidDevice {
        /// The offending device string.
        device: String,
    },

    /// Worker thread creation failed while bringing up a device queue.
    /// The partially constructed queue has been torn down.
    #[error("Failed to spawn worker thread for device {device}: {source}")]
    WorkerSpawn {
        /// Device whose queue could not be brought up.
        device: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A submission could not be accepted.
    #[error("Submission rejected: {reason}")]
    SubmissionRejected {
        /// Why the submission was refused.
        reason: String,
    },
}

/// Errors raised while executing a single DAG operation.
///
/// The first failure observed for a request is recorded on its run info and
/// surfaced once, when the client is unblocked.
#[derive(Debug, Clone, Error)]
pub enum OpError {
    /// An input key was not present in the request context.
    #[error("Missing input {key:?} for op {op}")]
    MissingInput {
        /// Position of the op in its DAG.
        op: usize,
        /// The symbolic key that was absent.
        key: String,
    },

    /// A model invocation failed in the backend.
    #[error("Model {model} failed on {device}: {message}")]
    Model {
        /// Model identifier.
        model: String,
        /// Device the run was pinned to.
        device: String,
        /// Backend error message.
        message: String,
    },

    /// A script invocation failed in the backend.
    #[error("Script {script}:{function} failed on {device}: {message}")]
    Script {
        /// Script identifier.
        script: String,
        /// Entry point that was invoked.
        function: String,
        /// Device the run was pinned to.
        device: String,
        /// Backend error message.
        message: String,
    },

    /// A backend returned a different number of outputs than the op declares.
    #[error("Op {op} produced {actual} outputs, expected {expected}")]
    OutputArity {
        /// Position of the op in its DAG.
        op: usize,
        /// Number of output slots the op declares.
        expected: usize,
        /// Number of tensors the backend returned.
        actual: usize,
    },

    /// A tensor manipulation failed (shape mismatch, bad split, ...).
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
}

/// Errors raised by tensor construction and batching helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// The provided data length does not match the shape's element count.
    #[error("Data length {data_len} does not match shape {shape:?}")]
    DataLength {
        /// Declared shape.
        shape: Vec<usize>,
        /// Actual number of elements provided.
        data_len: usize,
    },

    /// Concatenation requires at least one tensor and matching inner shapes.
    #[error("Cannot concatenate: {reason}")]
    Concat {
        /// Why the concatenation failed.
        reason: String,
    },

    /// Split sizes must add up to the tensor's batch dimension.
    #[error("Cannot split batch of {batch} into chunks {sizes:?}")]
    Split {
        /// The tensor's 0-th dimension.
        batch: usize,
        /// Requested chunk sizes.
        sizes: Vec<usize>,
    },
}
