//! Differentiable tensor operations.
//!
//! Every op computes its result eagerly with `ndarray` and, when an input
//! requires gradients, records an exact backward closure on the output.

pub mod activation;
pub mod arithmetic;
pub mod convolution;
pub mod dropout;
pub mod embedding;
pub mod matmul;
pub mod norm;
pub mod shape;

pub use activation::{log_softmax, relu, sigmoid, tanh};
pub use arithmetic::{add, mean, mul, mul_scalar, sub, sum};
pub use convolution::{conv_nd, conv_output_size};
pub use dropout::dropout;
pub use embedding::embedding;
pub use matmul::matmul;
pub use norm::{batch_norm, BatchNormSettings};
pub use shape::{cat, permute, reshape, select, slice_last_dim, stack};
