pub mod dropout;
pub mod embedding;
pub mod flatten;
pub mod linear;

pub use dropout::Dropout;
pub use embedding::Embedding;
pub use flatten::Flatten;
pub use linear::Linear;
