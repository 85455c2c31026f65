//! CPU tensor wrapper and batch container.

use std::path::Path;

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{CoreError, Result};

/// A dense `f32` tensor backed by [`ndarray`].
///
/// The training substrate treats tensor numerics as an external concern;
/// this wrapper carries only the operations the loop and its callbacks
/// need: detaching, concatenation, per-sample reshaping, row selection,
/// and versioned persistence.
///
/// # Example
///
/// ```rust
/// use fitloop_core::Tensor;
///
/// let t = Tensor::from_vec(&[2, 3], vec![1., 2., 3., 4., 5., 6.])?;
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.numel(), 6);
/// # Ok::<(), fitloop_core::CoreError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
}

/// On-disk representation of a tensor.
///
/// The `version` field is the persistence protocol version; readers reject
/// versions they do not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Persistence protocol version.
    pub version: u32,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major element data.
    pub data: Vec<f32>,
}

/// Highest persistence protocol version this build can read and write.
pub const TENSOR_RECORD_VERSION: u32 = 1;

impl Tensor {
    /// Create a tensor from a shape and row-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len()` does not match the shape.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| CoreError::InvalidShape(e.to_string()))?;
        Ok(Self { data: array })
    }

    /// Create a rank-1 tensor from a vector.
    #[must_use]
    pub fn from_vec1(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            data: ArrayD::from_shape_vec(IxDyn(&[len]), data)
                .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[len]))),
        }
    }

    /// Create a rank-0 (scalar) tensor.
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    /// Get the tensor shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Get the length of one axis, if it exists.
    #[must_use]
    pub fn size(&self, axis: usize) -> Option<usize> {
        self.data.shape().get(axis).copied()
    }

    /// Total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the single element of a one-element tensor.
    #[must_use]
    pub fn item(&self) -> Option<f32> {
        if self.numel() == 1 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    /// Copy the elements out in row-major order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Return a copy severed from any producing computation.
    ///
    /// Autodiff lives behind the [`Module`](crate::Module) seam, so on this
    /// backend a detach is a plain copy; callers still go through it so the
    /// gradient boundary is explicit.
    #[must_use]
    pub fn detach(&self) -> Self {
        self.clone()
    }

    /// Move the tensor to a device.
    #[must_use]
    pub fn to_device(&self, _device: Device) -> Self {
        self.clone()
    }

    /// Concatenate tensors along `dim`.
    ///
    /// Scalars concatenate as length-1 vectors.
    ///
    /// # Errors
    ///
    /// Returns an error when `parts` is empty or shapes disagree off-axis.
    pub fn cat(parts: &[Self], dim: usize) -> Result<Self> {
        if parts.is_empty() {
            return Err(CoreError::InvalidShape(
                "cannot concatenate zero tensors".into(),
            ));
        }
        let promoted: Vec<ArrayD<f32>> = parts
            .iter()
            .map(|t| {
                if t.data.ndim() == 0 {
                    t.data
                        .clone()
                        .into_shape_with_order(IxDyn(&[1]))
                        .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[1])))
                } else {
                    t.data.clone()
                }
            })
            .collect();
        let views: Vec<_> = promoted.iter().map(|a| a.view()).collect();
        let joined = ndarray::concatenate(Axis(dim), &views)
            .map_err(|e| CoreError::ShapeMismatch(e.to_string()))?;
        Ok(Self { data: joined })
    }

    /// Reshape to a new shape with the same number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the element counts differ.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let data = self
            .data
            .clone()
            .into_shape_with_order(IxDyn(shape))
            .map_err(|e| CoreError::InvalidShape(e.to_string()))?;
        Ok(Self { data })
    }

    /// Mean over one axis, removing it.
    ///
    /// # Errors
    ///
    /// Returns an error when the axis is out of bounds or has zero length.
    pub fn mean_axis(&self, axis: usize) -> Result<Self> {
        if axis >= self.data.ndim() {
            return Err(CoreError::InvalidShape(format!(
                "axis {} out of bounds for rank {}",
                axis,
                self.data.ndim()
            )));
        }
        let data = self.data.mean_axis(Axis(axis)).ok_or_else(|| {
            CoreError::InvalidShape(format!("cannot reduce zero-length axis {axis}"))
        })?;
        Ok(Self { data })
    }

    /// Select rows (entries along the first axis) by index.
    ///
    /// # Errors
    ///
    /// Returns an error for rank-0 tensors or out-of-bounds indices.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        if self.data.ndim() == 0 {
            return Err(CoreError::InvalidShape(
                "cannot select rows of a scalar".into(),
            ));
        }
        let n = self.data.shape()[0];
        if let Some(bad) = indices.iter().find(|&&i| i >= n) {
            return Err(CoreError::InvalidShape(format!(
                "row index {bad} out of bounds for {n} rows"
            )));
        }
        Ok(Self {
            data: self.data.select(Axis(0), indices),
        })
    }

    /// Take `len` contiguous rows starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range exceeds the first axis.
    pub fn narrow_rows(&self, start: usize, len: usize) -> Result<Self> {
        if self.data.ndim() == 0 {
            return Err(CoreError::InvalidShape(
                "cannot narrow a scalar".into(),
            ));
        }
        let n = self.data.shape()[0];
        if start + len > n {
            return Err(CoreError::InvalidShape(format!(
                "rows {start}..{} out of bounds for {n} rows",
                start + len
            )));
        }
        let view = self
            .data
            .slice_axis(Axis(0), Slice::from(start..start + len));
        Ok(Self {
            data: view.to_owned(),
        })
    }

    /// Serialize to a versioned JSON record at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or I/O failure.
    pub fn save<P: AsRef<Path>>(&self, path: P, version: u32) -> Result<()> {
        let record = TensorRecord {
            version,
            shape: self.shape().to_vec(),
            data: self.to_vec(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a tensor previously written by [`Tensor::save`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, malformed content, or an
    /// unsupported protocol version.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let record: TensorRecord = serde_json::from_str(&json)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        if record.version > TENSOR_RECORD_VERSION {
            return Err(CoreError::SerializationError(format!(
                "unsupported tensor record version {}",
                record.version
            )));
        }
        Self::from_vec(&record.shape, record.data)
    }
}

/// One batch of data as yielded by a dataloader.
///
/// `yb` is optional: unlabeled loaders (pure inference) yield inputs only,
/// and the loop skips loss computation for them.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input tensor, samples along the first axis.
    pub xb: Tensor,
    /// Optional target tensor, aligned with `xb` rows.
    pub yb: Option<Tensor>,
}

impl Batch {
    /// Create a new batch.
    #[must_use]
    pub fn new(xb: Tensor, yb: Option<Tensor>) -> Self {
        Self { xb, yb }
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.xb.size(0).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_shape_check() {
        assert!(Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0]).is_err());
        let t = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.numel(), 4);
    }

    #[test]
    fn test_scalar_item() {
        let t = Tensor::scalar(0.5);
        assert_eq!(t.shape(), &[] as &[usize]);
        assert_eq!(t.item(), Some(0.5));
        assert_eq!(Tensor::from_vec1(vec![1.0, 2.0]).item(), None);
    }

    #[test]
    fn test_cat_vectors() {
        let a = Tensor::from_vec1(vec![1.0, 2.0]);
        let b = Tensor::from_vec1(vec![3.0]);
        let c = Tensor::cat(&[a, b], 0).unwrap();
        assert_eq!(c.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cat_scalars_promote() {
        let a = Tensor::scalar(0.5);
        let b = Tensor::scalar(0.3);
        let c = Tensor::cat(&[a, b], 0).unwrap();
        assert_eq!(c.shape(), &[2]);
        assert_eq!(c.to_vec(), vec![0.5, 0.3]);
    }

    #[test]
    fn test_cat_empty_fails() {
        assert!(Tensor::cat(&[], 0).is_err());
    }

    #[test]
    fn test_reshape_mean_axis() {
        let t = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let m = t.mean_axis(1).unwrap();
        assert_eq!(m.shape(), &[2]);
        assert_eq!(m.to_vec(), vec![2.0, 5.0]);

        let r = t.reshape(&[3, 2]).unwrap();
        assert_eq!(r.shape(), &[3, 2]);
        assert!(t.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_select_and_narrow_rows() {
        let t = Tensor::from_vec(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let s = t.select_rows(&[2, 0]).unwrap();
        assert_eq!(s.to_vec(), vec![5.0, 6.0, 1.0, 2.0]);
        assert!(t.select_rows(&[3]).is_err());

        let n = t.narrow_rows(1, 2).unwrap();
        assert_eq!(n.to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
        assert!(t.narrow_rows(2, 2).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        let t = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        t.save(&path, TENSOR_RECORD_VERSION).unwrap();
        let loaded = Tensor::load(&path).unwrap();
        assert_eq!(loaded, t);
    }

    #[test]
    fn test_load_rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        let t = Tensor::scalar(1.0);
        t.save(&path, TENSOR_RECORD_VERSION + 1).unwrap();
        assert!(Tensor::load(&path).is_err());
    }

    #[test]
    fn test_batch_size() {
        let b = Batch::new(Tensor::zeros(&[4, 3]), None);
        assert_eq!(b.batch_size(), 4);
    }
}
