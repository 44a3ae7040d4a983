//! The computation context a model runs in.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dtype::DataType;

/// Default data type for new parameters plus the random source used by
/// initializers and dropout.
///
/// A context belongs to exactly one [`Model`](crate::model::Model); tensors are
/// not `Send`, so everything touching a context stays on one thread.
#[derive(Debug, Clone)]
pub struct Context {
    data_type: DataType,
    rng: ChaCha8Rng,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Float32 context seeded from system entropy.
    pub fn new() -> Self {
        Self {
            data_type: DataType::Float32,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Deterministic context for reproducible initialization.
    pub fn seeded(seed: u64) -> Self {
        Self {
            data_type: DataType::Float32,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    /// Restarts the random source from `seed`, keeping the data type.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}
