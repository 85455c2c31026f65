//! In-memory dataset over first-axis samples.

use fitloop_core::Tensor;

use crate::error::{DataError, Result};

/// An in-memory dataset: inputs and optional targets, samples along the
/// first axis.
///
/// # Example
///
/// ```rust
/// use fitloop_core::Tensor;
/// use fitloop_data::Dataset;
///
/// let x = Tensor::from_vec(&[4, 2], vec![0.0; 8])?;
/// let y = Tensor::from_vec(&[4, 1], vec![0.0; 4])?;
/// let ds = Dataset::new(x, Some(y))?;
/// assert_eq!(ds.len(), 4);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Tensor,
    y: Option<Tensor>,
}

impl Dataset {
    /// Create a dataset, checking that inputs and targets align.
    ///
    /// # Errors
    ///
    /// Returns an error if targets are present with a different number
    /// of rows than the inputs.
    pub fn new(x: Tensor, y: Option<Tensor>) -> Result<Self> {
        if let Some(y) = &y {
            let nx = x.size(0).unwrap_or(0);
            let ny = y.size(0).unwrap_or(0);
            if nx != ny {
                return Err(DataError::LengthMismatch { x: nx, y: ny });
            }
        }
        Ok(Self { x, y })
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.size(0).unwrap_or(0)
    }

    /// Check if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the dataset carries targets.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        self.y.is_some()
    }

    /// Input tensor.
    #[must_use]
    pub fn x(&self) -> &Tensor {
        &self.x
    }

    /// Target tensor, if any.
    #[must_use]
    pub fn y(&self) -> Option<&Tensor> {
        self.y.as_ref()
    }

    /// Gather the given sample rows into `(inputs, targets)`.
    ///
    /// # Errors
    ///
    /// Returns an error on out-of-bounds indices.
    pub fn rows(&self, indices: &[usize]) -> Result<(Tensor, Option<Tensor>)> {
        let xb = self.x.select_rows(indices)?;
        let yb = match &self.y {
            Some(y) => Some(y.select_rows(indices)?),
            None => None,
        };
        Ok((xb, yb))
    }
}
