pub mod activation;
pub mod basic;
pub mod conv;
pub mod norm;
pub mod rnn;

// Basic
pub use basic::Dropout;
pub use basic::Embedding;
pub use basic::Flatten;
pub use basic::Linear;

// Conv
pub use conv::{Conv, ConvBuilder};

// Norm
pub use norm::BatchNorm;

// RNN
pub use rnn::GRU;
pub use rnn::LSTM;
pub use rnn::RNN;

pub use activation::{Activation, ActivationKind};
