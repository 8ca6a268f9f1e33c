//! Request DAG representation.
//!
//! A client submission is an ordered sequence of tensor operations, each
//! pinned to a compute device. Ops exchange values through symbolic keys in
//! the request context; an op becomes runnable once all its input keys have
//! been produced.

use serde::{Deserialize, Serialize};

use crate::types::Tensor;

/// Position of an op within its DAG's submission order.
pub type OpIndex = usize;

/// Normalize a device string for registry lookups and op pinning.
///
/// Device comparison is case-insensitive; the canonical form is uppercase
/// (e.g. `cpu` and `CPU` name the same queue, `gpu:0` becomes `GPU:0`).
pub fn normalize_device(device: &str) -> String {
    device.to_ascii_uppercase()
}

/// The kind of work a DAG op performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Invoke a model. A `batchsize` of zero means the op never batches;
    /// a non-zero `minbatchsize` asks the scheduler to defer the run until
    /// enough compatible inputs have accumulated.
    ModelRun {
        /// Model identifier resolved by the backend.
        model: String,
        /// Maximum total batch size, 0 to disable batching.
        #[serde(default)]
        batchsize: usize,
        /// Minimum batch size to wait for, 0 to run immediately.
        #[serde(default)]
        minbatchsize: usize,
    },
    /// Invoke a script entry point.
    ScriptRun {
        /// Script identifier resolved by the backend.
        script: String,
        /// Entry point within the script.
        function: String,
    },
    /// Store a literal tensor under the op's output key.
    TensorSet {
        /// The literal value.
        value: Tensor,
    },
    /// Mark a context value for retrieval in the reply.
    TensorGet,
}

/// A single operation in a request DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagOp {
    device: String,
    kind: OpKind,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
}

impl DagOp {
    /// Create an op pinned to `device`. The device string is normalized to
    /// its canonical uppercase form.
    pub fn new(device: &str, kind: OpKind) -> Self {
        Self {
            device: normalize_device(device),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add a symbolic input key.
    pub fn with_input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(key.into());
        self
    }

    /// Add a symbolic output key.
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    /// The canonical (uppercase) device this op is pinned to.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// The op's kind.
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Symbolic keys this op consumes.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Symbolic keys this op produces.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Whether the op may join a batch: a model run with `batchsize > 0`.
    pub fn is_batchable(&self) -> bool {
        matches!(self.kind, OpKind::ModelRun { batchsize, .. } if batchsize > 0)
    }
}

/// An ordered DAG of operations, as parsed from a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    ops: Vec<DagOp>,
    devices: Vec<String>,
}

impl Dag {
    /// Build a DAG from its ops in submission order.
    ///
    /// The distinct device list is derived here (first-reference order) and
    /// drives both queue placement and the request's reference count.
    pub fn new(ops: Vec<DagOp>) -> Self {
        let mut devices: Vec<String> = Vec::new();
        for op in &ops {
            if !devices.iter().any(|d| d == op.device()) {
                devices.push(op.device().to_string());
            }
        }
        Self { ops, devices }
    }

    /// The ops in submission order.
    pub fn ops(&self) -> &[DagOp] {
        &self.ops
    }

    /// Distinct devices touched by this DAG, in first-reference order.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Number of ops in the DAG.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the DAG has no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
