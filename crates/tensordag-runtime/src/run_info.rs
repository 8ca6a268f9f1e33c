//! Shared per-request state and the DAG inspection queries consumed by the
//! worker loop.
//!
//! A [`DagRunInfo`] is created once per client submission and shared between
//! every device queue the DAG touches and the client-unblock path. All
//! mutable state sits behind a single mutex; the inspection queries each
//! take it internally and never hold two request locks at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use tensordag_core::{Dag, DagOp, OpError, OpIndex, OpKind, Tensor};

/// Opaque handle to a blocked client, assigned by the host store.
pub type ClientId = u64;

/// Snapshot of a request's current op for one device.
///
/// `op` is the earliest pending op pinned to the device, or `None` when the
/// device has nothing left to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentOpInfo {
    /// Earliest pending op for the device.
    pub op: Option<OpIndex>,
    /// All of the op's inputs are present in the context.
    pub ready: bool,
    /// The op is a model run with a non-zero batch size.
    pub batchable: bool,
    /// No pending op remains for the device.
    pub device_complete: bool,
    /// No pending op remains for any device.
    pub dag_complete: bool,
}

/// Batch parameters of a model op, read against the live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpBatchInfo {
    /// Maximum total batch size.
    pub batchsize: usize,
    /// Minimum batch size to wait for, 0 to run immediately.
    pub minbatchsize: usize,
    /// Size of the op's first input along the batch dimension.
    pub inbatchsize: usize,
}

/// Result of a pairwise batch-compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMatch {
    /// The candidate invokes the same model with matching non-batch
    /// input dimensions.
    pub compatible: bool,
    /// The candidate's contribution to the batch (its first input's
    /// 0-th-dim size).
    pub added_batchsize: usize,
}

/// What a worker must do after retiring a device's contribution to a request.
#[derive(Debug)]
pub enum CompletionAction {
    /// Other devices still hold work for this request.
    Pending,
    /// The request is terminal and this worker won the unblock.
    Unblock(ClientId),
    /// The request is terminal but the client already detached; the run
    /// info is disposed by its last owner.
    Dispose,
}

struct DagState {
    /// Computed values keyed by symbolic name; seeded with the request's
    /// literal inputs.
    context: HashMap<String, Tensor>,
    /// Per-op completion flags, in submission order.
    done: Vec<bool>,
    /// Set on the first op failure; never cleared.
    dag_error: bool,
    /// The first failure, surfaced once at unblock.
    error: Option<OpError>,
    /// Number of device queues still holding work for this request.
    ref_count: usize,
    /// Devices whose contribution has already been retired. Guards the
    /// ref-count decrement so each device counts down at most once.
    finished_devices: HashSet<String>,
    client: Option<ClientId>,
}

/// Shared state for one client submission.
pub struct DagRunInfo {
    dag: Dag,
    state: Mutex<DagState>,
}

impl DagRunInfo {
    /// Create the run info for a submission with no literal inputs.
    pub fn new(dag: Dag, client: Option<ClientId>) -> Arc<Self> {
        Self::with_inputs(dag, HashMap::new(), client)
    }

    /// Create the run info for a submission, seeding the context with the
    /// request's literal inputs.
    ///
    /// The reference count starts at the number of distinct devices the DAG
    /// touches; each device queue counts down exactly once when it runs out
    /// of work for this request.
    pub fn with_inputs(
        dag: Dag,
        inputs: HashMap<String, Tensor>,
        client: Option<ClientId>,
    ) -> Arc<Self> {
        let ops = dag.len();
        let ref_count = dag.devices().len();
        Arc::new(Self {
            dag,
            state: Mutex::new(DagState {
                context: inputs,
                done: vec![false; ops],
                dag_error: false,
                error: None,
                ref_count,
                finished_devices: HashSet::new(),
                client,
            }),
        })
    }

    /// The submitted DAG.
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Locate the earliest pending op for `device` and report its readiness,
    /// batchability, and the device/DAG completion state.
    ///
    /// Once an op has failed, every device observes `device_complete`: the
    /// remaining ops are treated as complete for scheduling purposes.
    pub fn current_op_and_info(&self, device: &str) -> CurrentOpInfo {
        let state = self.state.lock();

        if state.dag_error {
            return CurrentOpInfo {
                op: None,
                ready: false,
                batchable: false,
                device_complete: true,
                dag_complete: state.done.iter().all(|d| *d),
            };
        }

        let mut current = None;
        let mut pending_any = false;
        for (index, op) in self.dag.ops().iter().enumerate() {
            if state.done[index] {
                continue;
            }
            pending_any = true;
            if op.device() == device {
                current = Some(index);
                break;
            }
        }

        match current {
            None => CurrentOpInfo {
                op: None,
                ready: false,
                batchable: false,
                device_complete: true,
                dag_complete: !pending_any,
            },
            Some(index) => {
                let op = &self.dag.ops()[index];
                let ready = op.inputs().iter().all(|key| state.context.contains_key(key));
                CurrentOpInfo {
                    op: Some(index),
                    ready,
                    batchable: op.is_batchable(),
                    device_complete: false,
                    dag_complete: false,
                }
            }
        }
    }

    /// Read the batch parameters of a model op. `inbatchsize` is zero when
    /// the op has no inputs or the first input has not been produced yet.
    pub fn op_batch_info(&self, op: OpIndex) -> OpBatchInfo {
        let state = self.state.lock();
        let (batchsize, minbatchsize) = match self.dag.ops()[op].kind() {
            OpKind::ModelRun {
                batchsize,
                minbatchsize,
                ..
            } => (*batchsize, *minbatchsize),
            _ => (0, 0),
        };
        OpBatchInfo {
            batchsize,
            minbatchsize,
            inbatchsize: self.in_batch_size(&state, op),
        }
    }

    /// Pairwise batch-compatibility: `other`'s op must invoke the same model
    /// and every input must match in all non-batch dimensions.
    ///
    /// The two request locks are taken one after the other, never nested.
    pub fn batching_match(&self, op: OpIndex, other: &DagRunInfo, other_op: OpIndex) -> BatchMatch {
        let no_match = BatchMatch {
            compatible: false,
            added_batchsize: 0,
        };

        let Some(mine) = self.batch_signature(op) else {
            return no_match;
        };
        let Some(theirs) = other.batch_signature(other_op) else {
            return no_match;
        };

        if mine.model != theirs.model || mine.inner_shapes != theirs.inner_shapes {
            return no_match;
        }

        BatchMatch {
            compatible: true,
            added_batchsize: theirs.inbatchsize,
        }
    }

    /// Model name plus per-input inner shapes, used for pairwise matching.
    fn batch_signature(&self, op: OpIndex) -> Option<BatchSignature> {
        let state = self.state.lock();
        let dag_op = &self.dag.ops()[op];
        let OpKind::ModelRun { model, .. } = dag_op.kind() else {
            return None;
        };

        let mut inner_shapes = Vec::with_capacity(dag_op.inputs().len());
        for key in dag_op.inputs() {
            inner_shapes.push(state.context.get(key)?.inner_shape().to_vec());
        }

        Some(BatchSignature {
            model: model.clone(),
            inner_shapes,
            inbatchsize: self.in_batch_size(&state, op),
        })
    }

    fn in_batch_size(&self, state: &DagState, op: OpIndex) -> usize {
        self.dag.ops()[op]
            .inputs()
            .first()
            .and_then(|key| state.context.get(key))
            .map(|tensor| tensor.batch_size())
            .unwrap_or(0)
    }

    /// Retire `device`'s contribution to the reference count.
    ///
    /// Idempotent per device: only the first call for a given device counts
    /// down. When the count reaches zero on a terminal request (complete or
    /// errored), the client handle is taken out under the lock, so exactly
    /// one caller ever observes [`CompletionAction::Unblock`].
    pub fn complete_device(&self, device: &str) -> CompletionAction {
        let mut state = self.state.lock();
        if state.finished_devices.insert(device.to_string()) {
            state.ref_count = state.ref_count.saturating_sub(1);
        }

        let terminal =
            state.ref_count == 0 && (state.dag_error || state.done.iter().all(|d| *d));
        if !terminal {
            return CompletionAction::Pending;
        }
        match state.client.take() {
            Some(client) => CompletionAction::Unblock(client),
            None => CompletionAction::Dispose,
        }
    }

    /// Whether any op of this request has failed.
    pub fn has_error(&self) -> bool {
        self.state.lock().dag_error
    }

    /// The first failure recorded for this request, if any.
    pub fn error(&self) -> Option<OpError> {
        self.state.lock().error.clone()
    }

    /// Whether a value exists in the context under `key`.
    pub fn has_value(&self, key: &str) -> bool {
        self.state.lock().context.contains_key(key)
    }

    /// Clone a computed value out of the context.
    pub fn value(&self, key: &str) -> Option<Tensor> {
        self.state.lock().context.get(key).cloned()
    }

    // ---- Executor-side accessors ----

    /// The earliest pending op for `device` together with a clone of the op,
    /// for the execution step. `None` when the device is complete or the
    /// request has errored.
    pub(crate) fn current_op(&self, device: &str) -> Option<(OpIndex, DagOp)> {
        let info = self.current_op_and_info(device);
        info.op.map(|index| (index, self.dag.ops()[index].clone()))
    }

    /// Clone the input tensors of an op out of the context.
    pub(crate) fn op_inputs(&self, op: OpIndex) -> Result<Vec<Tensor>, OpError> {
        let state = self.state.lock();
        let dag_op = &self.dag.ops()[op];
        let mut inputs = Vec::with_capacity(dag_op.inputs().len());
        for key in dag_op.inputs() {
            let tensor = state.context.get(key).ok_or_else(|| OpError::MissingInput {
                op,
                key: key.clone(),
            })?;
            inputs.push(tensor.clone());
        }
        Ok(inputs)
    }

    /// Publish an op's outputs into the context and mark it complete.
    pub(crate) fn complete_op(&self, op: OpIndex, outputs: Vec<(String, Tensor)>) {
        let mut state = self.state.lock();
        for (key, tensor) in outputs {
            state.context.insert(key, tensor);
        }
        state.done[op] = true;
    }

    /// Record an op failure. Only the first failure is kept.
    pub(crate) fn fail_op(&self, error: OpError) {
        let mut state = self.state.lock();
        state.dag_error = true;
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }
}

struct BatchSignature {
    model: String,
    inner_shapes: Vec<Vec<usize>>,
    inbatchsize: usize,
}

/// Read-only DAG inspection queries consumed by the worker loop.
///
/// The canonical implementation is [`GraphInspector`]; the seam exists so
/// scheduling behavior can be driven by scripted states in tests.
pub trait DagInspector: Send + Sync {
    /// See [`DagRunInfo::current_op_and_info`].
    fn current_op_and_info(&self, rinfo: &DagRunInfo, device: &str) -> CurrentOpInfo;
    /// See [`DagRunInfo::op_batch_info`].
    fn op_batch_info(&self, rinfo: &DagRunInfo, op: OpIndex) -> OpBatchInfo;
    /// See [`DagRunInfo::batching_match`].
    fn batching_match(
        &self,
        rinfo: &DagRunInfo,
        op: OpIndex,
        other: &DagRunInfo,
        other_op: OpIndex,
    ) -> BatchMatch;
}

/// [`DagInspector`] over the live request state.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphInspector;

impl DagInspector for GraphInspector {
    fn current_op_and_info(&self, rinfo: &DagRunInfo, device: &str) -> CurrentOpInfo {
        rinfo.current_op_and_info(device)
    }

    fn op_batch_info(&self, rinfo: &DagRunInfo, op: OpIndex) -> OpBatchInfo {
        rinfo.op_batch_info(op)
    }

    fn batching_match(
        &self,
        rinfo: &DagRunInfo,
        op: OpIndex,
        other: &DagRunInfo,
        other_op: OpIndex,
    ) -> BatchMatch {
        rinfo.batching_match(op, other, other_op)
    }
}
