//! Dataloader implementations for batched iteration.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use fitloop_core::{Batch, Device, Seed};

use crate::dataset::Dataset;
use crate::error::{DataError, Result};
use crate::split::Split;

/// A dataloader that produces batches from a dataset.
///
/// Supports shuffling with deterministic seeds and dropping the last
/// incomplete batch.
///
/// # Example
///
/// ```rust,ignore
/// let loader = DataLoader::builder(dataset)
///     .batch_size(32)
///     .shuffle(true)
///     .seed(Seed::new(42))
///     .build()?;
///
/// for batch in loader.batches()? {
///     // process batch
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<Seed>,
    split: Split,
}

impl DataLoader {
    /// Create a new dataloader builder.
    #[must_use]
    pub fn builder(dataset: Dataset) -> DataLoaderBuilder {
        DataLoaderBuilder::new(dataset)
    }

    /// Get the dataset.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether batches are shuffled.
    #[must_use]
    pub fn shuffled(&self) -> bool {
        self.shuffle
    }

    /// Get the data split this loader serves.
    #[must_use]
    pub fn split(&self) -> Split {
        self.split
    }

    /// Number of batches one pass yields.
    #[must_use]
    pub fn n_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.batch_size == 0 {
            return 0;
        }
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Materialize one pass over the data.
    ///
    /// Shuffling (if enabled) is applied per call; with a seed the order
    /// is the same on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if row gathering fails.
    pub fn batches(&self) -> Result<Vec<Batch>> {
        if self.batch_size == 0 {
            return Err(DataError::ZeroBatchSize);
        }
        let n = self.dataset.len();
        let mut indices: Vec<usize> = (0..n).collect();
        if self.shuffle {
            let mut rng = match self.seed {
                Some(seed) => seed.to_rng(),
                None => ChaCha8Rng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }

        let mut out = Vec::with_capacity(self.n_batches());
        for chunk in indices.chunks(self.batch_size) {
            if self.drop_last && chunk.len() < self.batch_size {
                break;
            }
            let (xb, yb) = self.dataset.rows(chunk)?;
            out.push(Batch::new(xb, yb));
        }
        Ok(out)
    }

    /// A copy of this loader that iterates the dataset in order and keeps
    /// the last incomplete batch.
    ///
    /// Prediction gathering uses this so results line up with dataset
    /// order.
    #[must_use]
    pub fn sequential(&self) -> Self {
        let mut dl = self.clone();
        dl.shuffle = false;
        dl.drop_last = false;
        dl
    }
}

/// Builder for [`DataLoader`].
#[derive(Debug)]
pub struct DataLoaderBuilder {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<Seed>,
    split: Split,
}

impl DataLoaderBuilder {
    /// Create a new builder with defaults (batch size 32, no shuffling).
    #[must_use]
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            batch_size: 32,
            shuffle: false,
            drop_last: false,
            seed: None,
            split: Split::Train,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable shuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the random seed for shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the data split this loader serves.
    #[must_use]
    pub fn split(mut self, split: Split) -> Self {
        self.split = split;
        self
    }

    /// Build the dataloader.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size.
    pub fn build(self) -> Result<DataLoader> {
        if self.batch_size == 0 {
            return Err(DataError::ZeroBatchSize);
        }
        Ok(DataLoader {
            dataset: self.dataset,
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
            split: self.split,
        })
    }
}

/// Train and validation dataloaders plus the device the learner runs on.
#[derive(Debug, Clone)]
pub struct DataLoaders {
    train: DataLoader,
    valid: DataLoader,
    device: Device,
}

impl DataLoaders {
    /// Create from already-built loaders.
    #[must_use]
    pub fn new(train: DataLoader, valid: DataLoader, device: Device) -> Self {
        Self {
            train,
            valid,
            device,
        }
    }

    /// Create a builder over two datasets.
    #[must_use]
    pub fn builder(train_ds: Dataset, valid_ds: Dataset) -> DataLoadersBuilder {
        DataLoadersBuilder::new(train_ds, valid_ds)
    }

    /// The training loader.
    #[must_use]
    pub fn train(&self) -> &DataLoader {
        &self.train
    }

    /// The validation loader.
    #[must_use]
    pub fn valid(&self) -> &DataLoader {
        &self.valid
    }

    /// Look a loader up by split index (0 = train, 1 = valid).
    #[must_use]
    pub fn loader(&self, ds_idx: usize) -> Option<&DataLoader> {
        match Split::from_index(ds_idx)? {
            Split::Train => Some(&self.train),
            Split::Valid => Some(&self.valid),
        }
    }

    /// The device the learner should place collaborators on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }
}

/// Builder for [`DataLoaders`].
#[derive(Debug)]
pub struct DataLoadersBuilder {
    train_ds: Dataset,
    valid_ds: Dataset,
    batch_size: usize,
    shuffle_train: bool,
    drop_last: bool,
    seed: Option<Seed>,
    device: Device,
}

impl DataLoadersBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(train_ds: Dataset, valid_ds: Dataset) -> Self {
        Self {
            train_ds,
            valid_ds,
            batch_size: 32,
            shuffle_train: true,
            drop_last: false,
            seed: None,
            device: Device::default(),
        }
    }

    /// Set the batch size for both loaders.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable shuffling of the training loader.
    ///
    /// The validation loader always iterates in order.
    #[must_use]
    pub fn shuffle_train(mut self, shuffle: bool) -> Self {
        self.shuffle_train = shuffle;
        self
    }

    /// Enable or disable dropping the last incomplete training batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the random seed for training shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the device.
    #[must_use]
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Build both loaders.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size.
    pub fn build(self) -> Result<DataLoaders> {
        let mut train = DataLoader::builder(self.train_ds)
            .batch_size(self.batch_size)
            .shuffle(self.shuffle_train)
            .drop_last(self.drop_last)
            .split(Split::Train);
        if let Some(seed) = self.seed {
            train = train.seed(seed);
        }
        let valid = DataLoader::builder(self.valid_ds)
            .batch_size(self.batch_size)
            .split(Split::Valid)
            .build()?;
        Ok(DataLoaders::new(train.build()?, valid, self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitloop_core::Tensor;

    fn toy_dataset(n: usize) -> Dataset {
        let x = Tensor::from_vec(&[n, 1], (0..n).map(|i| i as f32).collect()).unwrap();
        let y = Tensor::from_vec(&[n, 1], (0..n).map(|i| i as f32 * 10.0).collect()).unwrap();
        Dataset::new(x, Some(y)).unwrap()
    }

    #[test]
    fn test_n_batches() {
        let dl = DataLoader::builder(toy_dataset(10)).batch_size(4).build().unwrap();
        assert_eq!(dl.n_batches(), 3);

        let dl = DataLoader::builder(toy_dataset(10))
            .batch_size(4)
            .drop_last(true)
            .build()
            .unwrap();
        assert_eq!(dl.n_batches(), 2);
    }

    #[test]
    fn test_batches_in_order() {
        let dl = DataLoader::builder(toy_dataset(5)).batch_size(2).build().unwrap();
        let batches = dl.batches().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].xb.to_vec(), vec![0.0, 1.0]);
        assert_eq!(batches[2].xb.to_vec(), vec![4.0]);
        assert_eq!(batches[1].yb.as_ref().unwrap().to_vec(), vec![20.0, 30.0]);
    }

    #[test]
    fn test_seeded_shuffle_is_deterministic() {
        let dl = DataLoader::builder(toy_dataset(8))
            .batch_size(3)
            .shuffle(true)
            .seed(Seed::new(42))
            .build()
            .unwrap();
        let a: Vec<f32> = dl.batches().unwrap().iter().flat_map(|b| b.xb.to_vec()).collect();
        let b: Vec<f32> = dl.batches().unwrap().iter().flat_map(|b| b.xb.to_vec()).collect();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort_by(f32::total_cmp);
        assert_eq!(sorted, (0..8).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_undoes_shuffle() {
        let dl = DataLoader::builder(toy_dataset(4))
            .batch_size(2)
            .shuffle(true)
            .drop_last(true)
            .build()
            .unwrap();
        let seq = dl.sequential();
        assert!(!seq.shuffled());
        let flat: Vec<f32> = seq.batches().unwrap().iter().flat_map(|b| b.xb.to_vec()).collect();
        assert_eq!(flat, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dataloaders_split_lookup() {
        let dls = DataLoaders::builder(toy_dataset(6), toy_dataset(2))
            .batch_size(2)
            .build()
            .unwrap();
        assert_eq!(dls.loader(0).unwrap().len(), 6);
        assert_eq!(dls.loader(1).unwrap().len(), 2);
        assert!(dls.loader(2).is_none());
        assert_eq!(dls.valid().split(), Split::Valid);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(DataLoader::builder(toy_dataset(4)).batch_size(0).build().is_err());
    }
}
