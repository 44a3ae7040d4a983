use crate::autograd::Tensor;
use crate::block::{single_input, single_shape, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops::reshape;
use crate::shape::Shape;

/// Collapses everything after the batch axis: `(N, a, b, ...) -> (N, a*b*...)`.
pub struct Flatten {
    core: BlockCore,
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Flatten {
    pub fn new() -> Self {
        Self {
            core: BlockCore::new("flatten"),
        }
    }
}

impl Block for Flatten {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, _ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = single_input(inputs, "flatten")?;
        let shape = x.shape();
        let Some((&batch, rest)) = shape.split_first() else {
            return Err(Error::invalid_argument("flatten: rank-0 input"));
        };
        Ok(vec![reshape(x, &[batch, rest.iter().product()])?])
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let shape = single_shape(inputs, "flatten")?;
        if shape.rank() == 0 {
            return Err(Error::invalid_argument("flatten: rank-0 input"));
        }
        Ok(vec![shape.with_tail(&[shape.tail().iter().product()])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_agree_with_forward() {
        let mut ctx = Context::seeded(0);
        let f = Flatten::new();
        let x = Tensor::zeros(&[2, 3, 4]);
        let y = f.forward(&mut ctx, &[x]).unwrap();
        let inferred = f.output_shapes(&[Shape::new(&[2, 3, 4])]).unwrap();
        assert!(inferred[0].matches(&y[0].shape()));
        assert_eq!(y[0].shape(), vec![2, 12]);
    }
}
