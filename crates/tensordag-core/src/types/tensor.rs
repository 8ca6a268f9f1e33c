//! Dense tensor values exchanged between DAG operations.
//!
//! The 0-th dimension is the batch dimension: opportunistic batching
//! concatenates compatible inputs along it and splits the outputs back
//! per request after the run.

use serde::{Deserialize, Serialize};

use crate::error::TensorError;

/// A dense row-major tensor of `f32` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor from a shape and its row-major data.
    ///
    /// Fails when the data length does not match the element count implied
    /// by the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TensorError::DataLength {
                shape,
                data_len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The raw row-major data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Size along the batch (0-th) dimension. Zero for rank-0 tensors.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// The shape with the batch dimension stripped.
    ///
    /// Two tensors can join the same batch iff their inner shapes match.
    pub fn inner_shape(&self) -> &[usize] {
        if self.shape.is_empty() {
            &self.shape
        } else {
            &self.shape[1..]
        }
    }

    /// Number of elements in one batch row.
    fn row_len(&self) -> usize {
        self.inner_shape().iter().product()
    }

    /// Concatenate tensors along the batch dimension.
    ///
    /// All inputs must share the same inner shape; the result's batch size
    /// is the sum of the inputs'.
    pub fn concat(parts: &[&Tensor]) -> Result<Tensor, TensorError> {
        let first = parts.first().ok_or_else(|| TensorError::Concat {
            reason: "empty input".to_string(),
        })?;
        let inner = first.inner_shape().to_vec();

        let mut batch = 0;
        let mut data = Vec::new();
        for part in parts {
            if part.inner_shape() != inner.as_slice() {
                return Err(TensorError::Concat {
                    reason: format!(
                        "inner shape {:?} does not match {:?}",
                        part.inner_shape(),
                        inner
                    ),
                });
            }
            batch += part.batch_size();
            data.extend_from_slice(&part.data);
        }

        let mut shape = Vec::with_capacity(inner.len() + 1);
        shape.push(batch);
        shape.extend_from_slice(&inner);
        Tensor::new(shape, data)
    }

    /// Split a tensor along the batch dimension into chunks of the given
    /// sizes. The sizes must add up exactly to the batch size.
    pub fn split(&self, sizes: &[usize]) -> Result<Vec<Tensor>, TensorError> {
        let total: usize = sizes.iter().sum();
        if total != self.batch_size() || self.shape.is_empty() {
            return Err(TensorError::Split {
                batch: self.batch_size(),
                sizes: sizes.to_vec(),
            });
        }

        let row = self.row_len();
        let inner = self.inner_shape().to_vec();
        let mut out = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for &size in sizes {
            let mut shape = Vec::with_capacity(inner.len() + 1);
            shape.push(size);
            shape.extend_from_slice(&inner);
            let end = offset + size * row;
            out.push(Tensor {
                shape,
                data: self.data[offset..end].to_vec(),
            });
            offset = end;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_batch_and_inner_shape() {
        let t = Tensor::zeros(vec![4, 2, 3]);
        assert_eq!(t.batch_size(), 4);
        assert_eq!(t.inner_shape(), &[2, 3]);

        let scalar = Tensor::new(vec![], vec![]).expect("rank-0 tensor");
        assert_eq!(scalar.batch_size(), 0);
        assert!(scalar.inner_shape().is_empty());
    }

    #[test]
    fn test_concat_then_split_roundtrip() {
        let a = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::new(vec![1, 2], vec![5.0, 6.0]).unwrap();

        let joined = Tensor::concat(&[&a, &b]).unwrap();
        assert_eq!(joined.shape(), &[3, 2]);
        assert_eq!(joined.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let parts = joined.split(&[2, 1]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn test_concat_rejects_mismatched_inner_shape() {
        let a = Tensor::zeros(vec![2, 2]);
        let b = Tensor::zeros(vec![2, 3]);
        assert!(Tensor::concat(&[&a, &b]).is_err());
    }

    #[test]
    fn test_split_rejects_bad_sizes() {
        let t = Tensor::zeros(vec![3, 2]);
        assert!(t.split(&[2, 2]).is_err());
    }
}
