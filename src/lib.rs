// src/lib.rs

//! Block-based neural network layers on `ndarray`: deferred-shape parameters,
//! shape inference, a portable parameter file format, training and a small
//! text pipeline.

pub mod autograd;
#[macro_use]
pub mod block;
pub mod context;
pub mod dataset;
pub mod dtype;
pub mod error;
pub mod init;
pub mod layers;
pub mod loader;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod ops;
pub mod optim;
pub mod pair_list;
pub mod parameter;
pub mod serialization;
pub mod shape;
pub mod text;
pub mod trainer;

pub use autograd::{no_grad, NoGradGuard, Tensor};
pub use block::{Block, BlockCore, Sequential};
pub use context::Context;
pub use dataset::{ArrayDataset, Batch};
pub use dtype::DataType;
pub use error::{Error, Result};
pub use init::Initializer;
pub use loss::Loss;
pub use metrics::{EpochMetrics, TrainingHistory};
pub use model::Model;
pub use optim::{Adam, Optimizer, OptimizerConfig, Sgd};
pub use pair_list::PairList;
pub use parameter::{Parameter, ParameterKind};
pub use shape::Shape;
pub use trainer::{Trainer, TrainingConfig};
