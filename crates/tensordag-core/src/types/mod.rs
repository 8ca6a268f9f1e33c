//! Core data model: tensors and request DAGs.

mod dag;
mod tensor;

pub use dag::{Dag, DagOp, OpIndex, OpKind, normalize_device};
pub use tensor::Tensor;
