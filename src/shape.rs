//! Tensor shapes used for shape inference.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered tuple of dimension sizes.
///
/// The leading (batch) dimension may be left symbolic with
/// [`Shape::with_unknown_batch`]; every other dimension is concrete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    batch: Option<usize>,
    tail: Vec<usize>,
    unknown_batch: bool,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        match dims.split_first() {
            Some((&batch, tail)) => Self {
                batch: Some(batch),
                tail: tail.to_vec(),
                unknown_batch: false,
            },
            None => Self::scalar(),
        }
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Self {
            batch: None,
            tail: Vec::new(),
            unknown_batch: false,
        }
    }

    /// Shape `(?, tail...)` whose batch size is not known yet.
    pub fn with_unknown_batch(tail: &[usize]) -> Self {
        Self {
            batch: None,
            tail: tail.to_vec(),
            unknown_batch: true,
        }
    }

    /// Builds a shape with the same batch dimension as `self` and new trailing dims.
    pub fn with_tail(&self, tail: &[usize]) -> Self {
        Self {
            batch: self.batch,
            tail: tail.to_vec(),
            unknown_batch: self.unknown_batch,
        }
    }

    pub fn rank(&self) -> usize {
        if self.batch.is_some() || self.unknown_batch {
            self.tail.len() + 1
        } else {
            0
        }
    }

    pub fn has_unknown_batch(&self) -> bool {
        self.unknown_batch
    }

    /// Size of the leading dimension, `None` when symbolic or rank 0.
    pub fn batch(&self) -> Option<usize> {
        self.batch
    }

    /// Dimensions after the leading one.
    pub fn tail(&self) -> &[usize] {
        &self.tail
    }

    /// Size of dimension `axis`, `None` if symbolic or out of range.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        if axis == 0 {
            self.batch
        } else {
            self.tail.get(axis - 1).copied()
        }
    }

    pub fn last(&self) -> Option<usize> {
        match self.tail.last() {
            Some(&d) => Some(d),
            None => self.batch,
        }
    }

    /// Element count, `None` while the batch is symbolic.
    pub fn size(&self) -> Option<usize> {
        if self.unknown_batch {
            None
        } else {
            Some(self.batch.unwrap_or(1) * self.tail.iter().product::<usize>())
        }
    }

    /// Concrete dimensions, failing while the batch is symbolic.
    pub fn concrete(&self) -> Result<Vec<usize>> {
        if self.unknown_batch {
            return Err(Error::invalid_argument(format!(
                "shape {self} has a symbolic batch dimension"
            )));
        }
        let mut dims = Vec::with_capacity(self.rank());
        dims.extend(self.batch);
        dims.extend_from_slice(&self.tail);
        Ok(dims)
    }

    /// True if `dims` is an instance of this shape (symbolic batch matches anything).
    pub fn matches(&self, dims: &[usize]) -> bool {
        if dims.len() != self.rank() {
            return false;
        }
        match dims.split_first() {
            None => true,
            Some((&b, tail)) => {
                (self.unknown_batch || self.batch == Some(b)) && tail == self.tail.as_slice()
            }
        }
    }

    /// Requires rank `expected`, reporting `context` otherwise.
    pub fn expect_rank(&self, expected: usize, context: &str) -> Result<()> {
        if self.rank() == expected {
            Ok(())
        } else {
            Err(Error::shape_mismatch(
                context,
                format!("rank {expected}"),
                format!("{self}"),
            ))
        }
    }

    /// Like [`Shape::dim`] but an error when the dimension is unavailable.
    pub fn require_dim(&self, axis: usize, context: &str) -> Result<usize> {
        self.dim(axis).ok_or_else(|| {
            Error::shape_mismatch(
                context,
                format!("known dimension {axis}"),
                format!("{self}"),
            )
        })
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        if self.unknown_batch {
            write!(f, "?")?;
            first = false;
        } else if let Some(b) = self.batch {
            write!(f, "{b}")?;
            first = false;
        }
        for d in &self.tail {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_shape_accessors() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.batch(), Some(2));
        assert_eq!(s.dim(2), Some(4));
        assert_eq!(s.dim(3), None);
        assert_eq!(s.last(), Some(4));
        assert_eq!(s.size(), Some(24));
        assert_eq!(s.concrete().unwrap(), vec![2, 3, 4]);
        assert_eq!(s.to_string(), "(2, 3, 4)");
    }

    #[test]
    fn unknown_batch_is_symbolic() {
        let s = Shape::with_unknown_batch(&[4, 4]);
        assert_eq!(s.rank(), 3);
        assert!(s.has_unknown_batch());
        assert_eq!(s.batch(), None);
        assert_eq!(s.size(), None);
        assert!(s.concrete().is_err());
        assert!(s.matches(&[7, 4, 4]));
        assert!(!s.matches(&[7, 4, 5]));
        assert_eq!(s.to_string(), "(?, 4, 4)");
    }

    #[test]
    fn with_tail_keeps_batch() {
        let s = Shape::with_unknown_batch(&[4]).with_tail(&[3]);
        assert_eq!(s, Shape::with_unknown_batch(&[3]));
        let c = Shape::new(&[5, 2]).with_tail(&[7, 7]);
        assert_eq!(c.concrete().unwrap(), vec![5, 7, 7]);
    }

    #[test]
    fn scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.size(), Some(1));
        assert!(s.matches(&[]));
        assert_eq!(Shape::new(&[]), s);
    }

    #[test]
    fn expect_rank_reports_mismatch() {
        let err = Shape::new(&[2, 2]).expect_rank(3, "conv1d input").unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
