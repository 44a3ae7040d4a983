pub mod convolution;

pub use convolution::{Conv, ConvBuilder};
