//! Operation execution.
//!
//! The worker loop hands evicted requests to an [`OpExecutor`]; the
//! canonical implementation, [`SessionExecutor`], resolves each request's
//! current op for the device, performs tensor ops against the request
//! context directly, and delegates model and script compute to a
//! [`ModelBackend`] supplied by the host.
//!
//! Results and failures are written back into the request state; the request
//! lock is only held while reading inputs and publishing outputs, never
//! across the compute call itself.

use std::sync::Arc;

use tensordag_core::{tdag_op, DagOp, OpError, OpKind, Tensor};

use crate::run_info::DagRunInfo;

/// Model and script compute, supplied by the host.
///
/// Implementations may block for arbitrary duration; calls are made without
/// any scheduler lock held.
pub trait ModelBackend: Send + Sync {
    /// Run `model` on `device` over the given inputs, returning one tensor
    /// per declared output.
    fn run_model(&self, model: &str, device: &str, inputs: &[Tensor])
        -> Result<Vec<Tensor>, OpError>;

    /// Run `script`'s `function` entry point on `device`.
    fn run_script(
        &self,
        script: &str,
        function: &str,
        device: &str,
        inputs: &[Tensor],
    ) -> Result<Vec<Tensor>, OpError>;
}

/// Executes a request's current op, singly or as a batched group.
///
/// Failures are recorded on the affected requests rather than returned: the
/// scheduler observes them through the request error flag.
pub trait OpExecutor: Send + Sync {
    /// Execute the current op of `rinfo` for `device`.
    fn run_single(&self, rinfo: &DagRunInfo, device: &str);

    /// Execute the current ops of a group of compatible model requests as a
    /// single batched call, splitting the outputs back per request.
    fn run_batched(&self, batch: &[Arc<DagRunInfo>], device: &str);
}

/// The canonical [`OpExecutor`] over a [`ModelBackend`].
pub struct SessionExecutor {
    backend: Arc<dyn ModelBackend>,
}

impl SessionExecutor {
    /// Create an executor delegating model/script compute to `backend`.
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    fn dispatch(
        &self,
        op_index: usize,
        op: &DagOp,
        device: &str,
        inputs: &[Tensor],
    ) -> Result<Vec<Tensor>, OpError> {
        match op.kind() {
            OpKind::TensorSet { value } => Ok(vec![value.clone()]),
            // The value is already in the context; retrieval happens on the
            // reply path. Copy it through when an output key is declared.
            OpKind::TensorGet => Ok(inputs
                .iter()
                .take(op.outputs().len())
                .cloned()
                .collect()),
            OpKind::ModelRun { model, .. } => self.backend.run_model(model, device, inputs),
            OpKind::ScriptRun { script, function } => {
                self.backend.run_script(script, function, device, inputs)
            }
        }
        .and_then(|outputs| {
            if outputs.len() != op.outputs().len() {
                return Err(OpError::OutputArity {
                    op: op_index,
                    expected: op.outputs().len(),
                    actual: outputs.len(),
                });
            }
            Ok(outputs)
        })
    }
}

impl OpExecutor for SessionExecutor {
    fn run_single(&self, rinfo: &DagRunInfo, device: &str) {
        let Some((index, op)) = rinfo.current_op(device) else {
            return;
        };

        let inputs = match rinfo.op_inputs(index) {
            Ok(inputs) => inputs,
            Err(error) => {
                rinfo.fail_op(error);
                return;
            }
        };

        match self.dispatch(index, &op, device, &inputs) {
            Ok(outputs) => {
                let keyed = op
                    .outputs()
                    .iter()
                    .cloned()
                    .zip(outputs)
                    .collect::<Vec<_>>();
                rinfo.complete_op(index, keyed);
            }
            Err(error) => {
                tdag_op!(debug, device = device, op = index, error = %error, "Op failed");
                rinfo.fail_op(error);
            }
        }
    }

    fn run_batched(&self, batch: &[Arc<DagRunInfo>], device: &str) {
        // Gather each member's current model op and inputs. A member whose
        // inputs vanished fails alone and drops out of the group.
        let mut members = Vec::with_capacity(batch.len());
        for rinfo in batch {
            let Some((index, op)) = rinfo.current_op(device) else {
                continue;
            };
            match rinfo.op_inputs(index) {
                Ok(inputs) => members.push(Member {
                    rinfo: Arc::clone(rinfo),
                    index,
                    op,
                    inputs,
                }),
                Err(error) => rinfo.fail_op(error),
            }
        }

        let Some(first) = members.first() else {
            return;
        };
        let OpKind::ModelRun { model, .. } = first.op.kind() else {
            // Selection only batches model ops; fall back defensively.
            for member in &members {
                self.run_single(&member.rinfo, device);
            }
            return;
        };
        let model = model.clone();

        // Concatenate per input position, run once, split per member.
        let sizes: Vec<usize> = members
            .iter()
            .map(|m| m.inputs.first().map(|t| t.batch_size()).unwrap_or(0))
            .collect();
        let arity = first.inputs.len();

        let mut stacked = Vec::with_capacity(arity);
        for position in 0..arity {
            let parts: Vec<&Tensor> = members.iter().map(|m| &m.inputs[position]).collect();
            match Tensor::concat(&parts) {
                Ok(tensor) => stacked.push(tensor),
                Err(error) => {
                    fail_all(&members, OpError::Tensor(error));
                    return;
                }
            }
        }

        tdag_op!(debug,
            device = device,
            model = %model,
            members = members.len(),
            total_batch = sizes.iter().sum::<usize>(),
            "Running batched model op"
        );

        let outputs = match self.backend.run_model(&model, device, &stacked) {
            Ok(outputs) => outputs,
            Err(error) => {
                fail_all(&members, error);
                return;
            }
        };

        if outputs.len() != first.op.outputs().len() {
            fail_all(
                &members,
                OpError::OutputArity {
                    op: first.index,
                    expected: first.op.outputs().len(),
                    actual: outputs.len(),
                },
            );
            return;
        }

        let mut per_member: Vec<Vec<Tensor>> = vec![Vec::new(); members.len()];
        for output in &outputs {
            match output.split(&sizes) {
                Ok(parts) => {
                    for (member_outputs, part) in per_member.iter_mut().zip(parts) {
                        member_outputs.push(part);
                    }
                }
                Err(error) => {
                    fail_all(&members, OpError::Tensor(error));
                    return;
                }
            }
        }

        for (member, outputs) in members.iter().zip(per_member) {
            let keyed = member
                .op
                .outputs()
                .iter()
                .cloned()
                .zip(outputs)
                .collect::<Vec<_>>();
            member.rinfo.complete_op(member.index, keyed);
        }
    }
}

struct Member {
    rinfo: Arc<DagRunInfo>,
    index: usize,
    op: DagOp,
    inputs: Vec<Tensor>,
}

fn fail_all(members: &[Member], error: OpError) {
    for member in members {
        member.rinfo.fail_op(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tensordag_core::{Dag, DagOp};

    /// Doubles every input element; counts invocations.
    struct DoublingBackend {
        calls: AtomicUsize,
    }

    impl DoublingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ModelBackend for DoublingBackend {
        fn run_model(
            &self,
            _model: &str,
            _device: &str,
            inputs: &[Tensor],
        ) -> Result<Vec<Tensor>, OpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|t| {
                    Tensor::new(
                        t.shape().to_vec(),
                        t.data().iter().map(|v| v * 2.0).collect(),
                    )
                    .expect("shape preserved")
                })
                .collect())
        }

        fn run_script(
            &self,
            _script: &str,
            _function: &str,
            _device: &str,
            inputs: &[Tensor],
        ) -> Result<Vec<Tensor>, OpError> {
            Ok(inputs.to_vec())
        }
    }

    fn model_request(model: &str, input: Tensor) -> Arc<DagRunInfo> {
        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), input);
        DagRunInfo::with_inputs(
            Dag::new(vec![DagOp::new(
                "cpu",
                OpKind::ModelRun {
                    model: model.to_string(),
                    batchsize: 8,
                    minbatchsize: 0,
                },
            )
            .with_input("x")
            .with_output("y")]),
            inputs,
            None,
        )
    }

    #[test]
    fn test_run_single_publishes_outputs() {
        let backend = DoublingBackend::new();
        let executor = SessionExecutor::new(backend.clone());

        let rinfo = model_request("m", Tensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap());
        executor.run_single(&rinfo, "CPU");

        assert!(!rinfo.has_error());
        let y = rinfo.value("y").expect("output present");
        assert_eq!(y.data(), &[2.0, 4.0]);
        assert!(rinfo.current_op_and_info("CPU").device_complete);
    }

    #[test]
    fn test_run_batched_splits_outputs_per_member() {
        let backend = DoublingBackend::new();
        let executor = SessionExecutor::new(backend.clone());

        let a = model_request("m", Tensor::new(vec![2, 2], vec![1.0; 4]).unwrap());
        let b = model_request("m", Tensor::new(vec![3, 2], vec![1.0; 6]).unwrap());
        executor.run_batched(&[Arc::clone(&a), Arc::clone(&b)], "CPU");

        // One backend call for the whole group.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.value("y").unwrap().shape(), &[2, 2]);
        assert_eq!(b.value("y").unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn test_backend_failure_marks_every_member() {
        struct FailingBackend;
        impl ModelBackend for FailingBackend {
            fn run_model(
                &self,
                model: &str,
                device: &str,
                _inputs: &[Tensor],
            ) -> Result<Vec<Tensor>, OpError> {
                Err(OpError::Model {
                    model: model.to_string(),
                    device: device.to_string(),
                    message: "backend down".to_string(),
                })
            }
            fn run_script(
                &self,
                _script: &str,
                _function: &str,
                _device: &str,
                _inputs: &[Tensor],
            ) -> Result<Vec<Tensor>, OpError> {
                unreachable!("not used")
            }
        }

        let executor = SessionExecutor::new(Arc::new(FailingBackend));
        let a = model_request("m", Tensor::zeros(vec![2, 2]));
        let b = model_request("m", Tensor::zeros(vec![1, 2]));
        executor.run_batched(&[Arc::clone(&a), Arc::clone(&b)], "CPU");

        assert!(a.has_error());
        assert!(b.has_error());
        // Errored requests report completion everywhere.
        assert!(a.current_op_and_info("CPU").device_complete);
    }

    #[test]
    fn test_tensor_ops_bypass_backend() {
        let backend = DoublingBackend::new();
        let executor = SessionExecutor::new(backend.clone());

        let rinfo = DagRunInfo::new(
            Dag::new(vec![
                DagOp::new(
                    "cpu",
                    OpKind::TensorSet {
                        value: Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap(),
                    },
                )
                .with_output("t"),
                DagOp::new("cpu", OpKind::TensorGet).with_input("t"),
            ]),
            None,
        );

        executor.run_single(&rinfo, "CPU");
        assert!(rinfo.has_value("t"));

        executor.run_single(&rinfo, "CPU");
        assert!(rinfo.current_op_and_info("CPU").dag_complete);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
