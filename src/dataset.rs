//! In-memory datasets split into mini-batches.

use ndarray::{ArrayD, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::autograd::Tensor;
use crate::error::{Error, Result};

/// One mini-batch: inputs and their labels, sharing the leading dimension.
#[derive(Debug, Clone)]
pub struct Batch {
    pub data: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(0)
    }
}

/// Features and labels held as arrays, sample index on axis 0.
#[derive(Debug, Clone)]
pub struct ArrayDataset {
    data: ArrayD<f32>,
    labels: ArrayD<f32>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl ArrayDataset {
    pub fn new(data: ArrayD<f32>, labels: ArrayD<f32>, batch_size: usize) -> Result<Self> {
        let samples = |a: &ArrayD<f32>| a.shape().first().copied();
        if samples(&data).is_none() || samples(&data) != samples(&labels) {
            return Err(Error::shape_mismatch(
                "dataset labels",
                data.shape(),
                labels.shape(),
            ));
        }
        if batch_size == 0 {
            return Err(Error::invalid_config("batch size must be positive"));
        }
        Ok(Self {
            data,
            labels,
            batch_size,
            shuffle: false,
            seed: 0,
        })
    }

    /// Shuffle sample order every epoch, reproducibly from `seed`.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid_config("batch size must be positive"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Batches for `epoch`; the last one may be smaller.
    pub fn batches(&self, epoch: usize) -> Vec<Batch> {
        let seed = self.shuffle.then_some(self.seed);
        self.batches_with(self.batch_size, seed, epoch)
    }

    /// Batches of `batch_size`, shuffled from `shuffle_seed` and `epoch` when
    /// a seed is given.
    pub fn batches_with(&self, batch_size: usize, shuffle_seed: Option<u64>, epoch: usize) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
            .chunks(batch_size.max(1))
            .map(|idx| Batch {
                data: Tensor::new(self.data.select(Axis(0), idx)),
                labels: Tensor::new(self.labels.select(Axis(0), idx)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> ArrayDataset {
        let data = ArrayD::from_shape_fn(vec![n, 2], |ix| (ix[0] * 10 + ix[1]) as f32);
        let labels = ArrayD::from_shape_fn(vec![n], |ix| ix[0] as f32);
        ArrayDataset::new(data, labels, 4).unwrap()
    }

    #[test]
    fn splits_in_order_with_short_tail() {
        let ds = dataset(10);
        let batches = ds.batches(0);
        assert_eq!(ds.num_batches(), 3);
        assert_eq!(batches.iter().map(Batch::size).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(batches[2].labels.to_vec(), vec![8.0, 9.0]);
        assert_eq!(batches[0].data.to_vec()[..4], [0.0, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn shuffle_is_seeded_and_keeps_pairs() {
        let ds = dataset(12).with_shuffle(7);
        let a: Vec<f32> = ds.batches(0).iter().flat_map(|b| b.labels.to_vec()).collect();
        let b: Vec<f32> = ds.batches(0).iter().flat_map(|b| b.labels.to_vec()).collect();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort_by(f32::total_cmp);
        assert_eq!(sorted, (0..12).map(|v| v as f32).collect::<Vec<_>>());

        for batch in ds.batches(1) {
            let data = batch.data.to_vec();
            for (i, label) in batch.labels.to_vec().iter().enumerate() {
                assert_eq!(data[i * 2], label * 10.0);
            }
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let data = ArrayD::zeros(vec![3, 2]);
        let labels = ArrayD::zeros(vec![4]);
        assert!(ArrayDataset::new(data, labels, 2).is_err());
    }
}
